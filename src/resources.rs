//! Delphi-specific PE resources.
//!
//! Two RCDATA resources carry build metadata: `DVCLAL` holds a 16-byte
//! digest identifying the product edition the binary was built with, and
//! `PACKAGEINFO` lists the packages it requires and the units it
//! contains. Both are data-quality extras — their absence is a warning,
//! never a failure.

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::warn;

/// Product edition recovered from the DVCLAL digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum License {
    Standard,
    Professional,
    Enterprise,
}

static KNOWN_LICENSES: Lazy<Vec<(License, Vec<u8>)>> = Lazy::new(|| {
    [
        (License::Standard, "23785D23B6A5F31943F3400226D111C7"),
        (License::Professional, "A28CDF987B3C3A7926713F090F2A2517"),
        (License::Enterprise, "263D4F38C28237B8F3244203179B3A83"),
    ]
    .into_iter()
    .map(|(license, digest)| (license, hex::decode(digest).expect("digest literal")))
    .collect()
});

impl License {
    /// Match raw DVCLAL bytes against the known edition digests.
    pub fn from_bytes(data: &[u8]) -> Option<License> {
        KNOWN_LICENSES
            .iter()
            .find(|(_, digest)| digest.as_slice() == data)
            .map(|&(license, _)| license)
    }
}

/// A package this binary requires.
#[derive(Debug, Clone, Serialize)]
pub struct PackageRef {
    pub hash_code: u8,
    pub name: String,
}

/// A unit contained in this binary.
#[derive(Debug, Clone, Serialize)]
pub struct ContainedUnit {
    pub flags: u8,
    pub hash_code: u8,
    pub name: String,
}

/// Parsed PACKAGEINFO resource.
#[derive(Debug, Clone, Serialize)]
pub struct PackageInfo {
    pub flags: u32,
    pub requires: Vec<PackageRef>,
    pub contains: Vec<ContainedUnit>,
}

const MAX_PACKAGE_ENTRIES: u32 = 0x1000;

impl PackageInfo {
    /// Parse raw PACKAGEINFO bytes. Malformed data yields `None`; the
    /// caller downgrades that to a warning.
    pub fn parse(data: &[u8]) -> Option<PackageInfo> {
        let mut r = ByteReader { data, pos: 0 };

        let flags = r.read_u32()?;
        let requires_count = r.read_u32()?;
        if requires_count > MAX_PACKAGE_ENTRIES {
            warn!(requires_count, "implausible PACKAGEINFO requires count");
            return None;
        }
        let mut requires = Vec::with_capacity(requires_count as usize);
        for _ in 0..requires_count {
            let hash_code = r.read_u8()?;
            let name = r.read_cstring()?;
            requires.push(PackageRef { hash_code, name });
        }

        let contains_count = r.read_u32()?;
        if contains_count > MAX_PACKAGE_ENTRIES {
            warn!(contains_count, "implausible PACKAGEINFO contains count");
            return None;
        }
        let mut contains = Vec::with_capacity(contains_count as usize);
        for _ in 0..contains_count {
            let flags = r.read_u8()?;
            let hash_code = r.read_u8()?;
            let name = r.read_cstring()?;
            contains.push(ContainedUnit {
                flags,
                hash_code,
                name,
            });
        }

        Some(PackageInfo {
            flags,
            requires,
            contains,
        })
    }
}

/// Minimal cursor over a raw resource blob.
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl ByteReader<'_> {
    fn read_u8(&mut self) -> Option<u8> {
        let v = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        let b = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_cstring(&mut self) -> Option<String> {
        let rest = self.data.get(self.pos..)?;
        let len = rest.iter().position(|&b| b == 0)?;
        let text = std::str::from_utf8(&rest[..len]).ok()?;
        self.pos += len + 1;
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_license_digests() {
        let professional = hex::decode("A28CDF987B3C3A7926713F090F2A2517").unwrap();
        assert_eq!(License::from_bytes(&professional), Some(License::Professional));

        let enterprise = hex::decode("263D4F38C28237B8F3244203179B3A83").unwrap();
        assert_eq!(License::from_bytes(&enterprise), Some(License::Enterprise));

        assert_eq!(License::from_bytes(&[0u8; 16]), None);
        assert_eq!(License::from_bytes(&professional[..8]), None);
    }

    #[test]
    fn test_packageinfo_parse() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes()); // flags
        data.extend_from_slice(&1u32.to_le_bytes()); // requires
        data.push(0x42);
        data.extend_from_slice(b"rtl\0");
        data.extend_from_slice(&2u32.to_le_bytes()); // contains
        data.push(0);
        data.push(0x11);
        data.extend_from_slice(b"System\0");
        data.push(0);
        data.push(0x12);
        data.extend_from_slice(b"SysUtils\0");

        let info = PackageInfo::parse(&data).unwrap();
        assert_eq!(info.requires.len(), 1);
        assert_eq!(info.requires[0].name, "rtl");
        assert_eq!(info.contains.len(), 2);
        assert_eq!(info.contains[1].name, "SysUtils");
        assert_eq!(info.contains[1].hash_code, 0x12);
    }

    #[test]
    fn test_packageinfo_rejects_truncation() {
        // Declares two units but carries only one.
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.push(0);
        data.push(0x11);
        data.extend_from_slice(b"System\0");

        assert!(PackageInfo::parse(&data).is_none());
    }

    #[test]
    fn test_packageinfo_bounds_counts() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(PackageInfo::parse(&data).is_none());
    }
}
