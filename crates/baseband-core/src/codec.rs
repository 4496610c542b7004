//! Register map codec
//!
//! [`decode`] turns a (possibly partial) capture of register bytes into
//! [`Settings`]; [`encode`] turns a (possibly partial) [`Settings`] into an
//! address-keyed byte patch. Both work per container: a field is decoded
//! only if every byte of its container was captured, and a patch always
//! covers whole containers.

use crate::error::{Error, Result};
use crate::register::{Field, RegisterMap};
use crate::settings::Settings;
use std::collections::BTreeMap;

/// Sparse register contents keyed by absolute register address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterImage {
    bytes: BTreeMap<u16, u8>,
}

impl RegisterImage {
    /// Empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Image holding `data` at consecutive addresses from `address`
    pub fn from_block(address: u16, data: &[u8]) -> Self {
        let mut image = Self::new();
        image.insert_block(address, data);
        image
    }

    /// Store `data` at consecutive addresses from `address`
    pub fn insert_block(&mut self, address: u16, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.bytes.insert(address.wrapping_add(i as u16), b);
        }
    }

    /// Byte at `address`
    pub fn get(&self, address: u16) -> Option<u8> {
        self.bytes.get(&address).copied()
    }

    /// `len` bytes from `address`, if all are present
    pub fn get_block(&self, address: u16, len: usize) -> Option<Vec<u8>> {
        (0..len)
            .map(|i| self.get(address.wrapping_add(i as u16)))
            .collect()
    }

    /// Number of bytes held
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overlay another image
    pub fn merge(&mut self, other: &RegisterImage) {
        self.bytes.extend(other.bytes.iter().map(|(&a, &b)| (a, b)));
    }

    /// Contiguous runs as (start address, bytes)
    pub fn ranges(&self) -> Vec<(u16, Vec<u8>)> {
        let mut runs: Vec<(u16, Vec<u8>)> = Vec::new();
        for (&address, &byte) in &self.bytes {
            match runs.last_mut() {
                Some((start, data)) if *start as usize + data.len() == address as usize => {
                    data.push(byte)
                }
                _ => runs.push((address, vec![byte])),
            }
        }
        runs
    }
}

fn container(map: &RegisterMap, field: &Field, image: &RegisterImage) -> Option<Vec<u8>> {
    image.get_block(map.address_of(field), field.width.size())
}

/// Decode every non-volatile field whose container is present in `image`
///
/// Fields whose bytes were not captured are omitted from the result.
pub fn decode(map: &RegisterMap, image: &RegisterImage) -> Settings {
    decode_fields(map, map.fields().filter(|f| !f.volatile), image)
}

/// Decode every field, including volatile status fields
pub fn decode_all(map: &RegisterMap, image: &RegisterImage) -> Settings {
    decode_fields(map, map.fields(), image)
}

fn decode_fields<'f>(
    map: &RegisterMap,
    fields: impl Iterator<Item = &'f Field>,
    image: &RegisterImage,
) -> Settings {
    fields
        .filter_map(|field| {
            let bytes = container(map, field, image)?;
            Some((field.path.clone(), field.from_raw(&field.extract(&bytes))))
        })
        .collect()
}

/// Encode `settings` into a patch of whole containers
///
/// Every leaf is looked up and validated before anything is produced:
/// unknown paths fail with [`Error::UnknownField`], out-of-domain values
/// and writes to volatile fields with [`Error::Validation`].
///
/// Bits of a shared container that `settings` does not mention are taken
/// from `base`; without a base (or when `base` lacks the container) they
/// are zero. Callers writing a partial document to a live device should
/// pass the current contents as `base`.
pub fn encode(
    map: &RegisterMap,
    settings: &Settings,
    base: Option<&RegisterImage>,
) -> Result<RegisterImage> {
    let mut containers: BTreeMap<u16, Vec<u8>> = BTreeMap::new();

    for (path, value) in settings.iter() {
        let field = map.lookup(path)?;
        if field.volatile {
            return Err(Error::validation(path, value, "field is read-only"));
        }
        let raw = field.to_raw(value)?;

        let address = map.address_of(field);
        let bytes = containers.entry(address).or_insert_with(|| {
            base.and_then(|b| b.get_block(address, field.width.size()))
                .unwrap_or_else(|| vec![0; field.width.size()])
        });
        field.insert(bytes, &raw);
    }

    let mut patch = RegisterImage::new();
    for (address, bytes) in containers {
        patch.insert_block(address, &bytes);
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ACTUALS, SETTINGS, SETTINGS_SIZE};
    use crate::register::FieldKind;
    use crate::settings::Value;
    use proptest::prelude::*;

    #[test]
    fn ranges_split_on_gaps() {
        let mut image = RegisterImage::from_block(0x1000, &[1, 2, 3]);
        image.insert_block(0x1005, &[9]);
        assert_eq!(
            image.ranges(),
            vec![(0x1000, vec![1, 2, 3]), (0x1005, vec![9])]
        );
    }

    #[test]
    fn encode_frequency_is_little_endian() {
        let mut s = Settings::new();
        s.insert("fm.0.rf_frequency_khz", 7020);
        let patch = encode(&SETTINGS, &s, None).unwrap();
        assert_eq!(patch.ranges(), vec![(0x100C, vec![0x6C, 0x1B])]);
        assert_eq!(decode(&SETTINGS, &patch), s);
    }

    #[test]
    fn encode_rejects_unknown_path() {
        let mut s = Settings::new();
        s.insert("video.video_level", 100);
        s.insert("video.colour", 1);
        assert!(matches!(
            encode(&SETTINGS, &s, None),
            Err(Error::UnknownField(p)) if p == "video.colour"
        ));
    }

    #[test]
    fn encode_rejects_bad_enum() {
        let mut s = Settings::new();
        s.insert("video.video_mode", "XYZ");
        match encode(&SETTINGS, &s, None) {
            Err(Error::Validation { field, value, .. }) => {
                assert_eq!(field, "video.video_mode");
                assert_eq!(value, "XYZ");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn encode_rejects_long_name() {
        let mut s = Settings::new();
        s.insert("name", "much too long a name");
        assert!(matches!(
            encode(&SETTINGS, &s, None),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn encode_refuses_volatile_fields() {
        let mut s = Settings::new();
        s.insert("fm1_audio_peak", 1);
        assert!(matches!(
            encode(&ACTUALS, &s, None),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn encode_keeps_base_bits() {
        let base = RegisterImage::from_block(0x1000, &[0xAA; SETTINGS_SIZE]);
        let mut s = Settings::new();
        s.insert("video.video_level", 100);
        let patch = encode(&SETTINGS, &s, Some(&base)).unwrap();
        // video container is the u16 at offset 43
        assert_eq!(patch.ranges(), vec![(0x102B, vec![100, 0xAA])]);
    }

    #[test]
    fn partial_decode_omits_missing_fields() {
        let image = RegisterImage::from_block(0x1000 + 43, &[0x64, 0x01]);
        let s = decode(&SETTINGS, &image);
        assert_eq!(s.get("video.video_level"), Some(&Value::Integer(100)));
        assert_eq!(s.get("video.video_mode"), Some(&Value::from("PAL")));
        assert!(!s.contains("video.enable"));
        assert!(!s.contains("name"));
    }

    #[test]
    fn name_round_trips_without_padding() {
        let mut s = Settings::new();
        s.insert("name", "Studio A");
        let patch = encode(&SETTINGS, &s, None).unwrap();
        assert_eq!(patch.len(), 12);
        assert_eq!(decode(&SETTINGS, &patch), s);
    }

    #[test]
    fn scaled_input_reports_rounded_value() {
        let mut s = Settings::new();
        s.insert("fm.1.rf_frequency_khz", 7020.5);
        let patch = encode(&SETTINGS, &s, None).unwrap();
        let back = decode(&SETTINGS, &patch);
        assert_eq!(back.get("fm.1.rf_frequency_khz"), Some(&Value::Integer(7021)));
    }

    #[test]
    fn spare_enum_code_writes_back() {
        let mut live = vec![0u8; SETTINGS_SIZE];
        // video.osd_mode lives in bits 3..5 of offset 44
        live[44] |= 0x18;
        let image = RegisterImage::from_block(0x1000, &live);
        let s = decode(&SETTINGS, &image);
        assert_eq!(s.get("video.osd_mode"), Some(&Value::Integer(3)));

        let patch = encode(&SETTINGS, &s, Some(&image)).unwrap();
        assert_eq!(patch.get_block(0x1000, SETTINGS_SIZE), Some(live));
    }

    /// Map 32 random bits to a value inside the field's domain
    fn valid_value(field: &Field, seed: u32) -> Value {
        match &field.kind {
            FieldKind::Unsigned { min, max } => {
                Value::Integer((*min + seed % (max - min + 1)) as i64)
            }
            FieldKind::Flag => Value::Integer((seed & 1) as i64),
            FieldKind::Scaled { step, max, .. } => {
                let steps = (max / step) as u32 + 1;
                Value::Integer(((seed % steps) as f64 * step) as i64)
            }
            // Spare codes past the named variants read back as integers
            FieldKind::Enum(variants) => match (seed as u64 % (field.raw_max() + 1)) as usize {
                i if i < variants.len() => Value::Text(variants[i].to_string()),
                i => Value::Integer(i as i64),
            },
            FieldKind::Text => {
                let len = seed as usize % (field.width.size() + 1);
                Value::Text((0..len).map(|i| (b'A' + (i as u8 % 26)) as char).collect())
            }
        }
    }

    proptest! {
        #[test]
        fn full_documents_round_trip(seeds in proptest::collection::vec(any::<u32>(), 66)) {
            let s: Settings = SETTINGS
                .fields()
                .zip(seeds)
                .map(|(f, seed)| (f.path.clone(), valid_value(f, seed)))
                .collect();
            let patch = encode(&SETTINGS, &s, None).unwrap();
            prop_assert_eq!(patch.len(), SETTINGS_SIZE);
            prop_assert_eq!(decode(&SETTINGS, &patch), s);
        }

        #[test]
        fn partial_documents_round_trip(
            seeds in proptest::collection::vec(any::<u32>(), 66),
            mask in proptest::collection::vec(any::<bool>(), 66),
        ) {
            let s: Settings = SETTINGS
                .fields()
                .zip(seeds)
                .zip(mask)
                .filter(|(_, keep)| *keep)
                .map(|((f, seed), _)| (f.path.clone(), valid_value(f, seed)))
                .collect();
            let patch = encode(&SETTINGS, &s, None).unwrap();
            let mut back = decode(&SETTINGS, &patch);
            let paths: Vec<String> = s.iter().map(|(p, _)| p.to_string()).collect();
            back.retain_paths(&paths);
            prop_assert_eq!(back, s);
        }
    }
}
