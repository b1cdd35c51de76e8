use sha2::{Digest, Sha256};
use thiserror::Error;

pub const RETAINED_LEN: usize = 16;
pub const RETAINED_MAGIC: [u8; 4] = *b"VALV";
pub const RETAINED_VERSION: u8 = 1;

const FLAG_MORNING: u8 = 0b001;
const FLAG_EVENING: u8 = 0b010;
const FLAG_TRUSTED: u8 = 0b100;
const FLAG_MASK: u8 = FLAG_MORNING | FLAG_EVENING | FLAG_TRUSTED;

pub type RetainedBlock = [u8; RETAINED_LEN];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RetainedStateError {
    #[error("retained block magic mismatch")]
    BadMagic,
    #[error("unsupported retained layout version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown bits set in retained flags/reserved bytes: {0:#04x}")]
    ReservedBits(u8),
    #[error("retained block checksum mismatch")]
    ChecksumMismatch,
}

/// Memory that survives deep sleep but not power loss.
pub trait RetainedRegion {
    fn read(&self) -> RetainedBlock;
    fn write(&mut self, block: &RetainedBlock);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetainedState {
    pub wake_count: u32,
    pub morning_fired: bool,
    pub evening_fired: bool,
    pub time_is_trusted: bool,
}

impl RetainedState {
    /// Reads the region; anything that does not validate loads as the cold-boot default.
    pub fn load(region: &dyn RetainedRegion) -> Self {
        match Self::decode(&region.read()) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("retained state invalid ({err}); starting from cold-boot defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, region: &mut dyn RetainedRegion) {
        region.write(&self.encode());
    }

    pub fn encode(&self) -> RetainedBlock {
        let mut block = [0u8; RETAINED_LEN];
        block[0..4].copy_from_slice(&RETAINED_MAGIC);
        block[4] = RETAINED_VERSION;
        block[5] = self.flags();
        block[8..12].copy_from_slice(&self.wake_count.to_le_bytes());
        let digest = checksum(&block[..12]);
        block[12..16].copy_from_slice(&digest);
        block
    }

    pub fn decode(block: &RetainedBlock) -> Result<Self, RetainedStateError> {
        if block[0..4] != RETAINED_MAGIC {
            return Err(RetainedStateError::BadMagic);
        }
        if block[4] != RETAINED_VERSION {
            return Err(RetainedStateError::UnsupportedVersion(block[4]));
        }

        let flags = block[5];
        let stray = (flags & !FLAG_MASK) | block[6] | block[7];
        if stray != 0 {
            return Err(RetainedStateError::ReservedBits(stray));
        }

        if block[12..16] != checksum(&block[..12]) {
            return Err(RetainedStateError::ChecksumMismatch);
        }

        let mut count = [0u8; 4];
        count.copy_from_slice(&block[8..12]);

        Ok(Self {
            wake_count: u32::from_le_bytes(count),
            morning_fired: flags & FLAG_MORNING != 0,
            evening_fired: flags & FLAG_EVENING != 0,
            time_is_trusted: flags & FLAG_TRUSTED != 0,
        })
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.morning_fired {
            flags |= FLAG_MORNING;
        }
        if self.evening_fired {
            flags |= FLAG_EVENING;
        }
        if self.time_is_trusted {
            flags |= FLAG_TRUSTED;
        }
        flags
    }
}

fn checksum(bytes: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(bytes);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Plain in-memory region, used by the host simulation and tests.
#[derive(Debug, Clone, Default)]
pub struct RamRegion {
    block: RetainedBlock,
}

impl RamRegion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates full power loss.
    pub fn clear(&mut self) {
        self.block = [0; RETAINED_LEN];
    }
}

impl RetainedRegion for RamRegion {
    fn read(&self) -> RetainedBlock {
        self.block
    }

    fn write(&mut self, block: &RetainedBlock) {
        self.block = *block;
    }
}
