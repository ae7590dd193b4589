// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Disk Plan Builder: turns `"100GB, 200GB"` into positional data disks.

use crate::Error;

/// One data disk. `index` is the zero-based position in the request and
/// determines the device letter or LUN.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiskSpec {
    pub index: usize,
    pub size_gb: u32,
}

impl DiskSpec {
    /// EC2 block device name: `/dev/sdb` for the first data disk, `/dev/sdc`
    /// for the second, and so on (`/dev/sda` is the root volume).
    pub fn device_name(&self) -> String {
        // `build` caps plans well below the end of the alphabet.
        let letter = (b'b' + self.index as u8) as char;
        format!("/dev/sd{letter}")
    }

    /// Logical unit number for providers that address disks by LUN.
    pub fn lun(&self) -> u32 {
        self.index as u32
    }

    /// Disk resource name: `<instance name><NN>`, counting from 01.
    pub fn disk_name(&self, instance_name: &str) -> String {
        format!("{instance_name}{:02}", self.index + 1)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiskPlan {
    disks: Vec<DiskSpec>,
}

/// Hard ceiling regardless of provider limits; device letters run out at
/// `/dev/sdz`.
const MAX_DEVICE_SLOTS: usize = 24;

impl DiskPlan {
    /// Parses a comma separated size list.
    ///
    /// Each entry may carry a case-insensitive `GB` suffix and surrounding
    /// whitespace. Any entry that is not a positive integer fails the whole
    /// plan; an empty list is an empty plan.
    pub fn build(sizes_csv: &str, max_disks: usize) -> Result<DiskPlan, Error> {
        if sizes_csv.trim().is_empty() {
            return Ok(DiskPlan::default());
        }

        let disks = sizes_csv
            .split(',')
            .enumerate()
            .map(|(index, entry)| {
                parse_size(entry).map(|size_gb| DiskSpec { index, size_gb })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let max_disks = max_disks.min(MAX_DEVICE_SLOTS);
        if disks.len() > max_disks {
            return Err(Error::InvalidSize {
                entry: sizes_csv.to_string(),
                reason: format!(
                    "{} data disks requested, at most {max_disks} can be \
                     attached",
                    disks.len()
                ),
            });
        }

        Ok(DiskPlan { disks })
    }

    pub fn disks(&self) -> &[DiskSpec] {
        &self.disks
    }

    pub fn len(&self) -> usize {
        self.disks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }
}

fn parse_size(entry: &str) -> Result<u32, Error> {
    let normalized = entry.trim().to_ascii_lowercase();
    let digits = normalized.strip_suffix("gb").unwrap_or(&normalized).trim();
    let invalid = |reason: &str| Error::InvalidSize {
        entry: entry.trim().to_string(),
        reason: reason.to_string(),
    };
    let size = digits
        .parse::<u32>()
        .map_err(|_| invalid("expected a whole number of gigabytes"))?;
    if size == 0 {
        return Err(invalid("size must be greater than zero"));
    }
    Ok(size)
}
