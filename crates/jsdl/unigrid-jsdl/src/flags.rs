use crate::document::CreationFlag;

/// Bit flags selecting how staged files are created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StagingFlags(u32);

impl StagingFlags {
    pub const NONE: StagingFlags = StagingFlags(0);
    pub const OVERWRITE: StagingFlags = StagingFlags(1);
    pub const APPEND: StagingFlags = StagingFlags(2);
    pub const DELETE_ON_TERMINATE: StagingFlags = StagingFlags(32);

    pub const fn from_bits(bits: u32) -> Self {
        StagingFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: StagingFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Append takes precedence over overwrite; neither means don't overwrite
    pub fn creation_flag(&self) -> CreationFlag {
        if self.contains(Self::APPEND) {
            CreationFlag::Append
        } else if self.contains(Self::OVERWRITE) {
            CreationFlag::Overwrite
        } else {
            CreationFlag::DontOverwrite
        }
    }

    pub fn delete_on_termination(&self) -> bool {
        self.contains(Self::DELETE_ON_TERMINATE)
    }
}

impl std::ops::BitOr for StagingFlags {
    type Output = StagingFlags;

    fn bitor(self, rhs: StagingFlags) -> StagingFlags {
        StagingFlags(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_mapping() {
        assert_eq!(StagingFlags::NONE.creation_flag(), CreationFlag::DontOverwrite);
        assert_eq!(StagingFlags::OVERWRITE.creation_flag(), CreationFlag::Overwrite);
        assert_eq!(
            (StagingFlags::OVERWRITE | StagingFlags::APPEND).creation_flag(),
            CreationFlag::Append
        );

        let flags = StagingFlags::from_bits(33);
        assert_eq!(flags.creation_flag(), CreationFlag::Overwrite);
        assert!(flags.delete_on_termination());
        assert!(!StagingFlags::APPEND.delete_on_termination());
    }
}
