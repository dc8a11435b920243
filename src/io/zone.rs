/*
    Quakeloc, robust seismic event relocation
    Copyright (C) 2026 Quakeloc Developers

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::errors::LocError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Cells in the 1x1 degree zone grid.
const ZONE_CELLS: usize = 180 * 360;

/// Bytes per zone-stats record, and per leading header record.
const ZONE_RECORD_LEN: usize = 40;

/// Depth statistics of one seismic zone.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ZoneDepthStats {
    pub mean_km: f64,
    pub min_km: f64,
    pub max_km: f64,
}

/// In-memory zone statistics: a Marsden-square key grid pointing into a
/// record table. Immutable after load and shared read-only between engines.
#[derive(Clone, Debug)]
pub struct ZoneTable {
    keys: Vec<i32>,
    stats: Vec<Option<ZoneDepthStats>>,
}

impl ZoneTable {
    pub fn new(keys: Vec<i32>, stats: Vec<Option<ZoneDepthStats>>) -> Self {
        Self { keys, stats }
    }

    /// Loads the table from the zone-keys and zone-stats binary files.
    pub fn from_files<P: AsRef<Path>>(keys_path: P, stats_path: P) -> Result<Self, LocError> {
        let keys = read_zone_keys(keys_path)?;
        let stats = read_zone_stats(stats_path)?;
        Ok(Self::new(keys, stats))
    }

    /// Depth statistics for a Marsden cell index, if the zone has any.
    pub fn lookup(&self, cell: usize) -> Option<ZoneDepthStats> {
        // Keys are 1-based file record numbers; subtracting two accounts for
        // the 1-based indexing and the leading header record.
        let key = *self.keys.get(cell)? as i64 - 2;
        if key < 0 {
            return None;
        }
        self.stats.get(key as usize).copied().flatten()
    }
}

/// Reads the zone-keys file: a raw little-endian i32 array of length
/// 180 x 360, colatitude outer and east longitude inner.
pub fn read_zone_keys<P: AsRef<Path>>(path: P) -> Result<Vec<i32>, LocError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut keys = Vec::with_capacity(ZONE_CELLS);
    for _ in 0..ZONE_CELLS {
        let key = reader.read_i32::<LittleEndian>().map_err(|e| {
            LocError::AuxData(format!("zone-keys file truncated: {e}"))
        })?;
        keys.push(key);
    }
    Ok(keys)
}

/// Reads the zone-stats file: a 40-byte header (`numYears` plus reserved
/// space) followed by 40-byte records. Records with `pctFree > 0` and
/// `minDepth < 900` contribute valid depth statistics; the rest map to
/// `None` so the file record numbering is preserved.
pub fn read_zone_stats<P: AsRef<Path>>(path: P) -> Result<Vec<Option<ZoneDepthStats>>, LocError> {
    let mut reader = BufReader::new(File::open(path)?);

    let _num_years = reader.read_i32::<LittleEndian>().map_err(|e| {
        LocError::AuxData(format!("zone-stats header unreadable: {e}"))
    })?;
    let mut reserved = [0u8; ZONE_RECORD_LEN - 4];
    reader.read_exact(&mut reserved).map_err(|e| {
        LocError::AuxData(format!("zone-stats header truncated: {e}"))
    })?;

    let mut stats = Vec::new();
    let mut record = [0u8; ZONE_RECORD_LEN];
    loop {
        match reader.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(LocError::AuxData(format!(
                    "zone-stats record truncated: {e}"
                )))
            }
        }
        let mut cursor = &record[..];
        let _n_degrees = cursor.read_i32::<LittleEndian>()?;
        let _per_year = cursor.read_f32::<LittleEndian>()?;
        let _max_mag = cursor.read_f32::<LittleEndian>()?;
        let _min_mag = cursor.read_f32::<LittleEndian>()?;
        let min_depth = cursor.read_f32::<LittleEndian>()?;
        let max_depth = cursor.read_f32::<LittleEndian>()?;
        let pct_free = cursor.read_f32::<LittleEndian>()?;
        let mean_depth = cursor.read_f32::<LittleEndian>()?;
        let _depth_mode = cursor.read_i32::<LittleEndian>()?;
        let _pct_ge = cursor.read_f32::<LittleEndian>()?;

        if pct_free > 0.0 && min_depth < 900.0 {
            stats.push(Some(ZoneDepthStats {
                mean_km: mean_depth as f64,
                min_km: min_depth as f64,
                max_km: max_depth as f64,
            }));
        } else {
            stats.push(None);
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod ut_zone {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    fn scratch(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("quakeloc-zone-{}-{}", std::process::id(), name));
        path
    }

    fn write_stats_record(
        buf: &mut Vec<u8>,
        min_depth: f32,
        max_depth: f32,
        pct_free: f32,
        mean_depth: f32,
    ) {
        buf.write_i32::<LittleEndian>(3).unwrap();
        buf.write_f32::<LittleEndian>(1.5).unwrap();
        buf.write_f32::<LittleEndian>(7.0).unwrap();
        buf.write_f32::<LittleEndian>(4.0).unwrap();
        buf.write_f32::<LittleEndian>(min_depth).unwrap();
        buf.write_f32::<LittleEndian>(max_depth).unwrap();
        buf.write_f32::<LittleEndian>(pct_free).unwrap();
        buf.write_f32::<LittleEndian>(mean_depth).unwrap();
        buf.write_i32::<LittleEndian>(1).unwrap();
        buf.write_f32::<LittleEndian>(0.1).unwrap();
    }

    #[test]
    fn round_trip_zone_files() {
        // Keys file: cell 5 points at file record 3, everything else empty.
        let keys_path = scratch("keys.bin");
        {
            let mut buf = Vec::with_capacity(ZONE_CELLS * 4);
            for cell in 0..ZONE_CELLS {
                let key = if cell == 5 { 3 } else { 0 };
                buf.write_i32::<LittleEndian>(key).unwrap();
            }
            let mut f = std::fs::File::create(&keys_path).unwrap();
            f.write_all(&buf).unwrap();
        }

        // Stats file: header, one invalid record, one valid record.
        let stats_path = scratch("stats.bin");
        {
            let mut buf = Vec::new();
            buf.write_i32::<LittleEndian>(45).unwrap();
            buf.extend_from_slice(&[0u8; ZONE_RECORD_LEN - 4]);
            write_stats_record(&mut buf, 950.0, 999.0, 0.5, 975.0);
            write_stats_record(&mut buf, 15.0, 220.0, 0.8, 95.0);
            let mut f = std::fs::File::create(&stats_path).unwrap();
            f.write_all(&buf).unwrap();
        }

        let table = ZoneTable::from_files(&keys_path, &stats_path).unwrap();
        // Key 3 - 2 = record index 1, the valid record.
        let stats = table.lookup(5).unwrap();
        assert_eq!(stats.mean_km, 95.0);
        assert_eq!(stats.min_km, 15.0);
        assert_eq!(stats.max_km, 220.0);
        // Key 0 means no zone.
        assert!(table.lookup(6).is_none());

        std::fs::remove_file(keys_path).ok();
        std::fs::remove_file(stats_path).ok();
    }

    #[test]
    fn truncated_keys_file_is_an_aux_error() {
        let path = scratch("short-keys.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let err = read_zone_keys(&path).unwrap_err();
        assert!(matches!(err, LocError::AuxData(_)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn deep_or_empty_records_are_skipped() {
        let path = scratch("invalid-stats.bin");
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(45).unwrap();
        buf.extend_from_slice(&[0u8; ZONE_RECORD_LEN - 4]);
        write_stats_record(&mut buf, 10.0, 100.0, 0.0, 50.0);
        write_stats_record(&mut buf, 901.0, 999.0, 0.9, 950.0);
        std::fs::write(&path, &buf).unwrap();

        let stats = read_zone_stats(&path).unwrap();
        assert_eq!(stats.len(), 2);
        assert!(stats[0].is_none());
        assert!(stats[1].is_none());
        std::fs::remove_file(path).ok();
    }
}
