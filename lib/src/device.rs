//! The four cascaded radar front-ends and their capture files.
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::capture::{NUM_DEVICES, RX_PER_CHIP};
use crate::errors::RepackError;

/// Number of logical RX channels of the cascade
pub const NUM_RX_CHANNELS: usize = NUM_DEVICES * RX_PER_CHIP;

/// Role of a front-end in the cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Master,
    Slave1,
    Slave2,
    Slave3,
}

/// Fixed RX-channel permutation: slice of the 16 logical RX channels that
/// each device fills.
pub const CHANNEL_PARTITION: [(Device, Range<usize>); NUM_DEVICES] = [
    (Device::Slave3, 0..4),
    (Device::Master, 4..8),
    (Device::Slave2, 8..12),
    (Device::Slave1, 12..16),
];

impl Device {
    pub const ALL: [Device; NUM_DEVICES] = [
        Device::Master,
        Device::Slave1,
        Device::Slave2,
        Device::Slave3,
    ];

    /// File name prefix of the device's capture files
    pub fn name(self) -> &'static str {
        match self {
            Device::Master => "master",
            Device::Slave1 => "slave1",
            Device::Slave2 => "slave2",
            Device::Slave3 => "slave3",
        }
    }

    /// RX channels of the assembled cube written by this device
    pub fn channels(self) -> Range<usize> {
        CHANNEL_PARTITION
            .iter()
            .find(|(device, _)| *device == self)
            .map(|(_, range)| range.clone())
            .unwrap_or(0..0)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master" => Ok(Device::Master),
            "slave1" => Ok(Device::Slave1),
            "slave2" => Ok(Device::Slave2),
            "slave3" => Ok(Device::Slave3),
            _ => Err(format!("Invalid device: {}", s)),
        }
    }
}

/// Check that the partition table covers every RX channel exactly once,
/// with one `RX_PER_CHIP` wide slice per device.
pub fn validate_partition(table: &[(Device, Range<usize>)]) -> Result<(), RepackError> {
    let mut owner: [Option<Device>; NUM_RX_CHANNELS] = [None; NUM_RX_CHANNELS];

    for device in Device::ALL {
        let count = table.iter().filter(|(d, _)| *d == device).count();
        if count != 1 {
            return Err(RepackError::Validation(format!(
                "device {device} appears {count} times in the channel partition"
            )));
        }
    }

    for (device, range) in table {
        if range.len() != RX_PER_CHIP || range.end > NUM_RX_CHANNELS {
            return Err(RepackError::Validation(format!(
                "channel slice {range:?} of {device} is not a {RX_PER_CHIP}-wide slice of 0..{NUM_RX_CHANNELS}"
            )));
        }
        for channel in range.clone() {
            if let Some(other) = owner[channel].replace(*device) {
                return Err(RepackError::Validation(format!(
                    "RX channel {channel} is claimed by both {other} and {device}"
                )));
            }
        }
    }

    if let Some(channel) = owner.iter().position(Option::is_none) {
        return Err(RepackError::Validation(format!(
            "RX channel {channel} is not covered by any device"
        )));
    }
    Ok(())
}

/// A data chunk and its index file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFiles {
    pub data: PathBuf,
    pub index: PathBuf,
}

/// List the `(data, index)` file pairs of a device, in file name order.
///
/// Data files are named `<device>*_data.bin`, index files `<device>*_idx.bin`.
pub fn discover_device_files(dir: &Path, device: Device) -> Result<Vec<ChunkFiles>, RepackError> {
    let mut data = Vec::new();
    let mut index = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(device.name()) {
            continue;
        }
        if name.ends_with("_data.bin") {
            data.push(path);
        } else if name.ends_with("_idx.bin") {
            index.push(path);
        }
    }

    if data.is_empty() {
        return Err(RepackError::NotFound {
            device: device.to_string(),
            kind: "data",
            dir: dir.to_path_buf(),
        });
    }
    if index.is_empty() {
        return Err(RepackError::NotFound {
            device: device.to_string(),
            kind: "index",
            dir: dir.to_path_buf(),
        });
    }
    if data.len() != index.len() {
        return Err(RepackError::Validation(format!(
            "device {device} has {} data files but {} index files",
            data.len(),
            index.len()
        )));
    }

    data.sort();
    index.sort();
    log::debug!("Found {} chunk(s) for device {}", data.len(), device);

    Ok(data
        .into_iter()
        .zip(index)
        .map(|(data, index)| ChunkFiles { data, index })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_partition_covers_all_channels_once() {
        validate_partition(&CHANNEL_PARTITION).unwrap();

        let mut seen = vec![0u8; NUM_RX_CHANNELS];
        for device in Device::ALL {
            for channel in device.channels() {
                seen[channel] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn test_partition_order() {
        assert_eq!(Device::Slave3.channels(), 0..4);
        assert_eq!(Device::Master.channels(), 4..8);
        assert_eq!(Device::Slave2.channels(), 8..12);
        assert_eq!(Device::Slave1.channels(), 12..16);
    }

    #[test]
    fn test_overlapping_partition_is_rejected() {
        let table = [
            (Device::Slave3, 0..4),
            (Device::Master, 2..6),
            (Device::Slave2, 8..12),
            (Device::Slave1, 12..16),
        ];
        assert!(matches!(
            validate_partition(&table),
            Err(RepackError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_device_is_rejected() {
        let table = [
            (Device::Slave3, 0..4),
            (Device::Master, 4..8),
            (Device::Slave2, 8..12),
            (Device::Slave2, 12..16),
        ];
        assert!(validate_partition(&table).is_err());
    }

    #[test]
    fn test_discover_pairs_sorted_files() {
        let dir = TempDir::new().unwrap();
        for name in [
            "master_0001_data.bin",
            "master_0000_data.bin",
            "master_0001_idx.bin",
            "master_0000_idx.bin",
            "slave1_0000_data.bin",
            "master.log",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let files = discover_device_files(dir.path(), Device::Master).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].data.ends_with("master_0000_data.bin"));
        assert!(files[0].index.ends_with("master_0000_idx.bin"));
        assert!(files[1].data.ends_with("master_0001_data.bin"));
    }

    #[test]
    fn test_discover_missing_index() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("slave1_0000_data.bin")).unwrap();
        let err = discover_device_files(dir.path(), Device::Slave1).unwrap_err();
        assert!(matches!(err, RepackError::NotFound { kind: "index", .. }));

        let err = discover_device_files(dir.path(), Device::Slave2).unwrap_err();
        assert!(matches!(err, RepackError::NotFound { kind: "data", .. }));
    }

    #[test]
    fn test_discover_count_mismatch() {
        let dir = TempDir::new().unwrap();
        for name in ["slave2_0000_data.bin", "slave2_0001_data.bin", "slave2_0000_idx.bin"] {
            File::create(dir.path().join(name)).unwrap();
        }
        assert!(matches!(
            discover_device_files(dir.path(), Device::Slave2),
            Err(RepackError::Validation(_))
        ));
    }
}
