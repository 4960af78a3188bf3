use super::DIR_ENTRY_SIZE;
use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;
use std::io::{Cursor, Write};
use std::str::FromStr;
use thiserror::Error;

pub const LABEL_LENGTH: usize = 11;
pub const NO_NAME: &[u8; LABEL_LENGTH] = b"NO NAME    ";

/// Characters DOS does not allow in short names and labels.
const FORBIDDEN: &[u8] = b"*?.,;:/\\|+=<>[]\"";

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("volume label \"{0}\" is longer than 11 bytes")]
    LabelTooLong(String),
    #[error("volume label \"{0}\" contains non ASCII characters")]
    LabelNotAscii(String),
    #[error("volume label contains forbidden character {0:?}")]
    LabelForbiddenCharacter(char),
    #[error("volume label cannot start with a space")]
    LabelLeadingSpace,
}

bitflags! {
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// Space padded volume label.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VolumeLabel([u8; LABEL_LENGTH]);

impl VolumeLabel {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        if !s.is_ascii() {
            return Err(ValidationError::LabelNotAscii(s.to_owned()));
        }
        if s.len() > LABEL_LENGTH {
            return Err(ValidationError::LabelTooLong(s.to_owned()));
        }
        if s.starts_with(' ') {
            return Err(ValidationError::LabelLeadingSpace);
        }

        if let Some(c) = s
            .bytes()
            .find(|c| *c < 0x20 || *c == 0x7F || FORBIDDEN.contains(c))
        {
            return Err(ValidationError::LabelForbiddenCharacter(c as char));
        }

        if s.bytes().any(|c| c.is_ascii_lowercase()) {
            warn!("lowercase labels might not work properly on some systems");
        }

        let mut label = [b' '; LABEL_LENGTH];
        label[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(label))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; LABEL_LENGTH] {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        &self.0 == NO_NAME
    }
}

impl Default for VolumeLabel {
    fn default() -> Self {
        Self(*NO_NAME)
    }
}

impl FromStr for VolumeLabel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VolumeLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(String::from_utf8_lossy(&self.0).trim_end())
    }
}

/// Packs a timestamp into FAT `(time, date)` fields. Dates outside of
/// 1980..=2107 are clamped to the representable range.
pub fn fat_timestamp(t: &NaiveDateTime) -> (u16, u16) {
    if t.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    if t.year() > 2107 {
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }

    let time = (t.second() / 2) | (t.minute() << 5) | (t.hour() << 11);
    let date = t.day() | (t.month() << 5) | (((t.year() - 1980) as u32) << 9);
    (time as u16, date as u16)
}

/// Root directory entry naming the volume.
pub fn volume_label_entry(
    label: &VolumeLabel,
    created: &NaiveDateTime,
) -> [u8; DIR_ENTRY_SIZE as usize] {
    let (time, date) = fat_timestamp(created);
    let mut entry = [0u8; DIR_ENTRY_SIZE as usize];
    let mut cursor = Cursor::new(&mut entry[..]);

    cursor.write_all(label.as_bytes()).unwrap();
    cursor.write_u8(Attributes::VOLUME_ID.bits()).unwrap();
    cursor.write_u8(0).unwrap();
    cursor.write_u8(0).unwrap();
    cursor.write_u16::<LittleEndian>(time).unwrap();
    cursor.write_u16::<LittleEndian>(date).unwrap();
    cursor.write_u16::<LittleEndian>(date).unwrap();
    cursor.write_u16::<LittleEndian>(0).unwrap();
    cursor.write_u16::<LittleEndian>(time).unwrap();
    cursor.write_u16::<LittleEndian>(date).unwrap();
    cursor.write_u16::<LittleEndian>(0).unwrap();
    cursor.write_u32::<LittleEndian>(0).unwrap();

    debug_assert_eq!(cursor.position(), DIR_ENTRY_SIZE as u64);
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_label_parse() {
        crate::tests_init();

        assert_eq!(VolumeLabel::parse("BOOT").unwrap().as_bytes(), b"BOOT       ");
        assert_eq!(VolumeLabel::parse("ABCDEFGHIJK").unwrap().as_bytes(), b"ABCDEFGHIJK");
        assert_eq!(VolumeLabel::parse("lower").unwrap().as_bytes(), b"lower      ");
        assert!(VolumeLabel::parse("").unwrap().is_default());
        assert!(VolumeLabel::parse("NO NAME").unwrap().is_default());
        assert_eq!(VolumeLabel::parse("DATA 1").unwrap().to_string(), "DATA 1");

        macro_rules! invalid {
            ($s:expr, $err:pat) => {{
                assert!(matches!(VolumeLabel::parse($s), Err($err)));
            }};
        }

        invalid!("ABCDEFGHIJKL", ValidationError::LabelTooLong(_));
        invalid!("ZAŻÓŁĆ", ValidationError::LabelNotAscii(_));
        invalid!(" LEADING", ValidationError::LabelLeadingSpace);
        invalid!("A*B", ValidationError::LabelForbiddenCharacter('*'));
        invalid!("A.B", ValidationError::LabelForbiddenCharacter('.'));
        invalid!("A\"B", ValidationError::LabelForbiddenCharacter('"'));
        invalid!("A\tB", ValidationError::LabelForbiddenCharacter('\t'));
        invalid!("A\x7FB", ValidationError::LabelForbiddenCharacter('\x7F'));
    }

    #[test]
    fn test_fat_timestamp() {
        crate::tests_init();

        let t = NaiveDate::from_ymd_opt(2021, 3, 14)
            .unwrap()
            .and_hms_opt(15, 9, 27)
            .unwrap();
        let (time, date) = fat_timestamp(&t);
        assert_eq!(time, 13 | (9 << 5) | (15 << 11));
        assert_eq!(date, 14 | (3 << 5) | (41 << 9));

        let t = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(fat_timestamp(&t), (0, 0x21));
    }

    #[test]
    fn test_volume_label_entry() {
        crate::tests_init();

        let t = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 6)
            .unwrap();
        let entry = volume_label_entry(&VolumeLabel::parse("MYDISK").unwrap(), &t);
        let (time, date) = fat_timestamp(&t);

        assert_eq!(&entry[..11], b"MYDISK     ");
        assert_eq!(entry[11], 0x08);
        assert_eq!(&entry[14..16], &time.to_le_bytes());
        assert_eq!(&entry[16..18], &date.to_le_bytes());
        assert_eq!(&entry[22..24], &time.to_le_bytes());
        assert_eq!(&entry[24..26], &date.to_le_bytes());
        assert_eq!(&entry[26..32], &[0; 6]);
    }
}
