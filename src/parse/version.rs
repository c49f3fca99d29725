use byteorder::WriteBytesExt;
use num_enum::{FromPrimitive, IntoPrimitive};
use std::{fmt, io};
use winnow::{binary::le_u8, seq, PResult, Parser, Partial};

/// A zip version (either created by, or required when reading an archive).
///
/// On the wire this is a u16: the low byte is the integer version (45 for
/// zip 4.5), the high byte identifies the host system that wrote the
/// archive. See the PKWARE appnote, section 4.4.2.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    /// Integer version, e.g. 45 for Zip version 4.5
    pub version: u8,

    /// The host system the archive was created on
    pub host_system: HostSystem,
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} v{}.{}",
            self.host_system,
            self.version / 10,
            self.version % 10
        )
    }
}

impl Version {
    /// Parse a version from a byte slice
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        seq! {Self {
            version: le_u8,
            host_system: le_u8.map(HostSystem::from),
        }}
        .parse_next(i)
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.version)?;
        w.write_u8(self.host_system.into())
    }

    /// Same version number, different host system.
    pub fn with_host_system(self, host_system: HostSystem) -> Self {
        Self {
            host_system,
            ..self
        }
    }

    /// Same host system, different version number.
    pub fn with_version(self, version: u8) -> Self {
        Self { version, ..self }
    }
}

/// System on which an archive was created, as encoded into a version u16.
///
/// See APPNOTE, section 4.4.2.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HostSystem {
    /// MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
    MsDos = 0,

    /// Amiga
    Amiga = 1,

    /// OpenVMS
    OpenVms = 2,

    /// UNIX
    Unix = 3,

    /// VM/CMS
    VmCms = 4,

    /// Atari ST
    AtariSt = 5,

    /// OS/2 H.P.F.S
    Os2Hpfs = 6,

    /// Macintosh (see `Osx`)
    Macintosh = 7,

    /// Z-System
    ZSystem = 8,

    /// CP/M
    CpM = 9,

    /// Windows NTFS
    WindowsNtfs = 10,

    /// MVS (OS/390 - Z/OS)
    Mvs = 11,

    /// VSE
    Vse = 12,

    /// Acorn Risc
    AcornRisc = 13,

    /// VFAT
    Vfat = 14,

    /// alternate MVS
    AlternateMvs = 15,

    /// BeOS
    BeOs = 16,

    /// Tandem
    Tandem = 17,

    /// OS/400
    Os400 = 18,

    /// OS X (Darwin)
    Osx = 19,

    /// Unknown host system
    #[num_enum(catch_all)]
    Unknown(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_byte_is_the_version_number() {
        let mut input = Partial::new(&[45u8, 3u8][..]);
        let v = Version::parser(&mut input).unwrap();
        assert_eq!(v.version, 45);
        assert_eq!(v.host_system, HostSystem::Unix);

        let mut out = Vec::new();
        v.write(&mut out).unwrap();
        assert_eq!(out, vec![45, 3]);
    }
}
