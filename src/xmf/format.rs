//! XMF format constants and closed tag enumerations.

use crate::util::{Error, Result};

/// Magic bytes at the start of an XMF file.
pub const XMF_MAGIC: &[u8; 4] = b"XMF_";

/// Version tag of XMF 1.00 / 1.01 containers.
pub const VERSION_1_TAG: &[u8; 4] = b"1.00";

/// Version tag of XMF 2.00 containers (including Mobile XMF).
pub const VERSION_2_TAG: &[u8; 4] = b"2.00";

/// XMF 2.00 file type id of Mobile XMF content.
pub const MOBILE_XMF_FILE_TYPE: u32 = 2;

/// Maximum number of stored bytes in a VLQ.
pub const MAX_VLQ_WIDTH: usize = 4;

/// Largest value a VLQ can carry (28 bits).
pub const MAX_VLQ_VALUE: u32 = (1 << 28) - 1;

/// Default ceiling on nesting depth and pointer chains.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Container layout selected by the version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmfVersion {
    V1,
    V2,
}

impl XmfVersion {
    pub fn from_tag(tag: [u8; 4]) -> Result<Self> {
        match &tag {
            VERSION_1_TAG => Ok(Self::V1),
            VERSION_2_TAG => Ok(Self::V2),
            _ => Err(Error::UnsupportedVersion(tag)),
        }
    }

    pub fn tag(self) -> &'static [u8; 4] {
        match self {
            Self::V1 => VERSION_1_TAG,
            Self::V2 => VERSION_2_TAG,
        }
    }
}

/// Generates a closed enumeration with a fallible `from_id`.
macro_rules! tag_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            /// Map an on-disk id to its variant; `offset` is reported on failure.
            pub fn from_id(value: u32, offset: u64) -> Result<Self> {
                match value {
                    $( $value => Ok(Self::$variant), )+
                    _ => Err(Error::UnknownTag { offset, kind: $kind, value }),
                }
            }

            pub fn id(self) -> u32 {
                self as u32
            }
        }
    };
}

tag_enum! {
    /// How a node's children or payload are physically located.
    ReferenceType, "reference type" {
        InlineResource = 1,
        InFileResource = 2,
        InFileNode = 3,
        ExternalResourceFile = 4,
        XmfUri = 5,
        XmfUriAndNodeId = 6,
    }
}

tag_enum! {
    /// Encoding of a metadata value, and whether hosts should display it.
    StringFormat, "string format" {
        ExtendedAsciiVisible = 0,
        ExtendedAsciiHidden = 1,
        Utf16Visible = 2,
        Utf16Hidden = 3,
        ScsuVisible = 4,
        ScsuHidden = 5,
        BinaryVisible = 6,
        BinaryHidden = 7,
    }
}

impl StringFormat {
    pub fn is_visible(self) -> bool {
        (self as u32) % 2 == 0
    }
}

tag_enum! {
    /// Standard metadata field ids.
    StandardField, "metadata field" {
        XmfFileType = 0,
        NodeName = 1,
        NodeId = 2,
        ResourceFormat = 3,
        FilenameOnDisk = 4,
        FilenameExtensionOnDisk = 5,
        MacOsFileTypeAndCreator = 6,
        MimeType = 7,
        Title = 8,
        CopyrightNotice = 9,
        Comment = 10,
        Autostart = 11,
        Preload = 12,
        ContentDescription = 13,
        Id3Metadata = 14,
    }
}

tag_enum! {
    /// Standard resource formats named by the ResourceFormat field.
    StandardResourceFormat, "resource format" {
        Smf0 = 0,
        Smf1 = 1,
        Dls1 = 2,
        Dls2 = 3,
        Dls21 = 4,
        MobileDls = 5,
    }
}

tag_enum! {
    /// Standard unpacker ids.
    StandardUnpacker, "unpacker" {
        None = 0,
        Zlib = 1,
    }
}

/// Format-type tag selecting the standard id space (resource formats, unpackers).
pub const STANDARD_ID_TYPE: u32 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic() {
        assert_eq!(XMF_MAGIC, b"XMF_");
        assert_eq!(XmfVersion::from_tag(*b"2.00").unwrap(), XmfVersion::V2);
        assert!(matches!(
            XmfVersion::from_tag(*b"3.00"),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_reference_types() {
        assert_eq!(ReferenceType::from_id(3, 0).unwrap(), ReferenceType::InFileNode);
        let err = ReferenceType::from_id(9, 40).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownTag { offset: 40, kind: "reference type", value: 9 }
        ));
    }

    #[test]
    fn test_string_format_visibility() {
        assert!(StringFormat::Utf16Visible.is_visible());
        assert!(!StringFormat::BinaryHidden.is_visible());
        assert_eq!(StringFormat::from_id(5, 0).unwrap(), StringFormat::ScsuHidden);
    }

    #[test]
    fn test_standard_field_ids() {
        assert_eq!(StandardField::from_id(14, 0).unwrap(), StandardField::Id3Metadata);
        assert_eq!(StandardField::ContentDescription.id(), 13);
        assert!(StandardField::from_id(15, 0).is_err());
    }
}
