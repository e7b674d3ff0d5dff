//! How far back a rescan reaches.

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

/// Rescan depth requested by the wallet owner.
///
/// # Examples
///
/// ```
/// use sesame_status::sync_depth::SyncDepth;
///
/// assert!(SyncDepth::Low < SyncDepth::Medium);
/// assert!(SyncDepth::Medium < SyncDepth::High);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncDepth {
    /// Rescan from the height of the most recent confirmed send.
    Low,
    /// Rescan from the previous hardcoded checkpoint.
    Medium,
    /// Rescan from the earliest block of interest.
    High,
}

impl SyncDepth {
    fn serialized_version() -> u8 {
        0
    }

    /// Deserialize from `reader`.
    pub fn read<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let _version = reader.read_u8()?;

        match reader.read_u8()? {
            0 => Ok(Self::Low),
            1 => Ok(Self::Medium),
            2 => Ok(Self::High),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "failed to read valid sync depth",
            )),
        }
    }

    /// Serialize into `writer`.
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_u8(Self::serialized_version())?;

        writer.write_u8(match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        })
    }
}

impl std::fmt::Display for SyncDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}
