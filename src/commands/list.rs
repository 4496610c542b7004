//! List commands implementation

/// List all transports compiled into this binary
pub fn list_transports() {
    let transports = baseband_transport::available_transports();
    if transports.is_empty() {
        println!("No transports available (recompile with transport features enabled)");
        return;
    }

    println!("Supported transports:");
    println!();
    for t in &transports {
        println!("  {:10} - {}", t.name, t.description);
        if !t.aliases.is_empty() {
            println!("  {:10}   aliases: {}", "", t.aliases.join(", "));
        }
    }
}

/// List attached USB adapters
pub fn list_devices() {
    let devices = baseband_transport::list_devices();
    if devices.is_empty() {
        println!("No adapters found");
        return;
    }
    println!("Attached adapters:");
    for d in &devices {
        println!("  {}", d);
    }
}
