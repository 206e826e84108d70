//! OLE Compound File Binary (CFB) reader for legacy `.xls` workbooks.
//! The whole container is loaded into memory; streams are then read by following
//! their sector chains. Every offset is bounds-checked so truncated or hostile
//! files fail with a `CfbError` instead of panicking.

use crate::error::SheetSleuthError;
use crate::helpers::string::get_u16;
use crate::helpers::string::get_u64;
use crate::helpers::string::get_usize;
use crate::helpers::string::to_usize_iter;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use thiserror::Error;

const MAX_REG_SECT: usize = 0xFFFF_FFFA;
const HEADER_SIZE: usize = 512;
const MINI_SECTOR_SIZE: usize = 64;
const MINI_STREAM_CUTOFF: usize = 4096;
const OLE_SIGNATURE: u64 = 0xE11A_B1A1_E011_CFD0;

#[derive(Error, Debug)]
pub enum CfbError {
    #[error("The file is corrupted or has an invalid compound file structure")]
    FileFormatError,

    #[error("Invalid OLE signature (not an office document?)")]
    OleSignatureError,

    #[error("Invalid sector size '2 ^ {1}' for major version '{0}'")]
    SectorSizeError(u16, u16),

    #[error("Sector chain starting at {0} is cyclic or out of range")]
    SectorChainError(usize),

    #[error("Empty root directory")]
    RootDirectoryError,
}

/// An in-memory compound file: directory index plus the regular and mini sector pools.
pub(crate) struct Cfb {
    directories: HashMap<String, Directory>,
    fat: Vec<usize>,
    sectors: Sectors,
    mini_fat: Vec<usize>,
    mini_sectors: Sectors,
}

impl Cfb {
    pub(crate) fn new<RS: Read + Seek>(reader: &mut RS) -> Result<Cfb, SheetSleuthError> {
        let size = reader.seek(SeekFrom::End(0))? as usize;
        if size < HEADER_SIZE {
            Err(CfbError::FileFormatError)?;
        }
        reader.seek(SeekFrom::Start(0))?;
        let mut data = vec![0u8; size];
        reader.read_exact(&mut data)?;

        let header = Header::new(&data)?;
        let sectors = Sectors {
            data,
            size: header.sector_size()?,
        };
        let fat = Self::load_fat(&sectors, &header)?;
        let directories = Self::load_directories(&fat, &sectors, header.directory_start)?;
        let mini_fat = if header.mini_fat_count > 0 {
            to_usize_iter(&Self::read_chain(&fat, &sectors, header.mini_fat_start)?).collect()
        } else {
            Vec::new()
        };
        let mini_data = match directories.get("Root Entry") {
            Some(root) => {
                let mut data = Self::read_chain(&fat, &sectors, root.start)?;
                data.truncate(root.size);
                data
            }
            None => Vec::new(),
        };

        Ok(Cfb {
            directories,
            fat,
            sectors,
            mini_fat,
            mini_sectors: Sectors {
                data: mini_data,
                size: MINI_SECTOR_SIZE,
            },
        })
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.directories.contains_key(name)
    }

    /// Reads a named stream, or `None` if the container has no such entry.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, SheetSleuthError> {
        let Some(directory) = self.directories.get(name) else {
            return Ok(None);
        };
        let mut bytes = if directory.size < MINI_STREAM_CUTOFF {
            Self::read_chain(&self.mini_fat, &self.mini_sectors, directory.start)?
        } else {
            Self::read_chain(&self.fat, &self.sectors, directory.start)?
        };
        bytes.truncate(directory.size);
        Ok(Some(bytes))
    }

    /// Builds the FAT from the 109 header DIFAT slots plus any chained DIFAT sectors.
    fn load_fat(sectors: &Sectors, header: &Header) -> Result<Vec<usize>, SheetSleuthError> {
        let mut difat: Vec<usize> = to_usize_iter(sectors.slice(76, HEADER_SIZE)?).collect();
        let mut index = header.difat_start;
        let mut visited = 0usize;
        while index < MAX_REG_SECT {
            visited += 1;
            if visited > header.difat_count.max(1) + sectors.count() {
                Err(CfbError::SectorChainError(header.difat_start))?;
            }
            difat.extend(to_usize_iter(sectors.get(index)?));
            index = difat.pop().ok_or(CfbError::FileFormatError)?;
        }

        let mut fat = Vec::new();
        for index in difat.into_iter().filter(|index| *index < MAX_REG_SECT) {
            fat.extend(to_usize_iter(sectors.get(index)?));
        }
        if fat.is_empty() {
            Err(CfbError::FileFormatError)?;
        }
        Ok(fat)
    }

    fn load_directories(fat: &[usize], sectors: &Sectors, start: usize) -> Result<HashMap<String, Directory>, SheetSleuthError> {
        let bytes = Self::read_chain(fat, sectors, start)?;
        let directories: HashMap<String, Directory> = bytes
            .chunks_exact(128)
            .filter_map(Directory::parse)
            .collect();
        if directories.is_empty() {
            Err(CfbError::RootDirectoryError)?;
        }
        Ok(directories)
    }

    /// Concatenates the sectors of one chain, refusing cycles and dangling indices.
    fn read_chain(fat: &[usize], sectors: &Sectors, start: usize) -> Result<Vec<u8>, SheetSleuthError> {
        let mut content = Vec::new();
        let mut index = start;
        let mut steps = 0usize;
        while index < MAX_REG_SECT {
            steps += 1;
            if steps > fat.len() {
                Err(CfbError::SectorChainError(start))?;
            }
            content.extend_from_slice(sectors.get(index)?);
            index = *fat.get(index).ok_or(CfbError::SectorChainError(start))?;
        }
        Ok(content)
    }
}

struct Sectors {
    data: Vec<u8>,
    size: usize,
}

impl Sectors {
    /// Sector `index`; regular sectors start after the header, mini sectors at zero.
    fn get(&self, index: usize) -> Result<&[u8], SheetSleuthError> {
        let base = if self.size == MINI_SECTOR_SIZE { 0 } else { self.size };
        let source = index
            .checked_mul(self.size)
            .and_then(|offset| offset.checked_add(base))
            .ok_or(CfbError::FileFormatError)?;
        if source >= self.data.len() {
            Err(CfbError::FileFormatError)?;
        }
        let target = self.data.len().min(source + self.size);
        Ok(&self.data[source..target])
    }

    fn slice(&self, source: usize, target: usize) -> Result<&[u8], SheetSleuthError> {
        Ok(self.data.get(source..target).ok_or(CfbError::FileFormatError)?)
    }

    fn count(&self) -> usize {
        self.data.len() / self.size.max(1)
    }
}

struct Header {
    major_version: u16,
    sector_shift: u16,
    directory_start: usize,
    mini_fat_start: usize,
    mini_fat_count: usize,
    difat_start: usize,
    difat_count: usize,
}

impl Header {
    fn new(data: &[u8]) -> Result<Self, SheetSleuthError> {
        let field = |offset| get_usize(data, offset).ok_or(CfbError::FileFormatError);
        if get_u64(data, 0) != Some(OLE_SIGNATURE) {
            Err(CfbError::OleSignatureError)?;
        }
        Ok(Header {
            major_version: get_u16(data, 26).ok_or(CfbError::FileFormatError)?,
            sector_shift: get_u16(data, 30).ok_or(CfbError::FileFormatError)?,
            directory_start: field(48)?,
            mini_fat_start: field(60)?,
            mini_fat_count: field(64)?,
            difat_start: field(68)?,
            difat_count: field(72)?,
        })
    }

    fn sector_size(&self) -> Result<usize, SheetSleuthError> {
        match (self.major_version, self.sector_shift) {
            (3, 9) => Ok(512),
            // Version 4 pads the header out to a full 4096-byte sector
            (4, 12) => Ok(4096),
            (version, shift) => Err(CfbError::SectorSizeError(version, shift))?,
        }
    }
}

struct Directory {
    start: usize,
    size: usize,
}

impl Directory {
    /// Parses one 128-byte directory entry; unused slots yield `None`.
    fn parse(bytes: &[u8]) -> Option<(String, Directory)> {
        let name_size = (get_u16(bytes, 64)? as usize).min(64);
        if name_size == 0 {
            return None;
        }
        let (name, _, _) = UTF_16LE.decode(&bytes[..name_size]);
        let name = match name.find('\0') {
            Some(position) => name[..position].to_owned(),
            None => name.into_owned(),
        };
        let start = get_usize(bytes, 116)?;
        let size = get_u64(bytes, 120)? as usize;
        Some((name, Directory { start, size }))
    }
}
