// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// Image encodings accepted as cover art
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Recognize an image by its leading magic bytes
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(Self::Png)
        } else {
            None
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Cover art ready to be embedded
#[derive(Clone, PartialEq, Eq)]
pub struct Artwork {
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl Artwork {
    /// Wrap downloaded bytes, rejecting anything that is not JPEG or PNG
    pub fn from_bytes(data: Vec<u8>) -> Option<Self> {
        let format = ImageFormat::sniff(&data)?;
        Some(Self { data, format })
    }
}

impl fmt::Debug for Artwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artwork")
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}
