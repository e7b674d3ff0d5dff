//! The synchronization strategy a wallet manager is constructed with.

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

/// How a sync manager talks to the blockchain. Fixed at construction; a
/// wallet that changes mode tears the old manager down and builds a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Transactions are discovered by polling a cooperative remote indexer
    /// (the "client" API).
    BrdOnly,
    /// Sync is delegated to a peer-to-peer peer manager.
    P2pOnly,
}

impl SyncMode {
    fn serialized_version() -> u8 {
        0
    }

    /// Deserialize from `reader`.
    pub fn read<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let _version = reader.read_u8()?;

        match reader.read_u8()? {
            0 => Ok(Self::BrdOnly),
            1 => Ok(Self::P2pOnly),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "failed to read valid sync mode",
            )),
        }
    }

    /// Serialize into `writer`.
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_u8(Self::serialized_version())?;

        writer.write_u8(match self {
            Self::BrdOnly => 0,
            Self::P2pOnly => 1,
        })
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BrdOnly => write!(f, "brd-only"),
            Self::P2pOnly => write!(f, "p2p-only"),
        }
    }
}
