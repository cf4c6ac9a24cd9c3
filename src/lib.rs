//!  Decoding, Encoding and Channel Removal for BMP Images
//!
//!  A decoder and encoder for uncompressed BMP (Windows Bitmap) images with 8 bits
//!  (palette indexed) or 24 bits (true color) per pixel, plus transforms that zero
//!  out the red, green or blue channel of an image.
//!
//!  ```no_run
//!  use bmp_channel::{BmpImage, Channel};
//!
//!  # fn main() -> bmp_channel::ImageResult<()> {
//!  let image = BmpImage::open("pepper.bmp")?;
//!  image.save("pepper_copy.bmp")?;
//!  image.remove_red("pepper_no_red.bmp")?;
//!
//!  let no_blue = image.with_channel_zeroed(Channel::Blue);
//!  assert_eq!(no_blue.width(), image.width());
//!  # Ok(())
//!  # }
//!  ```
//!
//!  # Related Links
//!  * <https://msdn.microsoft.com/en-us/library/windows/desktop/dd183375%28v=vs.85%29.aspx>
//!  * <https://en.wikipedia.org/wiki/BMP_file_format>
//!

use std::error::Error;
use std::fmt;

pub use crate::decoder::{BMPDecoder, Limits};
pub use crate::encoder::BMPEncoder;
pub use crate::image::{BmpImage, Channel, PaletteEntry, Pixels, Rgb, Row};

#[derive(Debug)]
pub enum ImageError {
    /// The data is not a well-formed BMP file.
    FormatError(String),
    /// The data may be a valid BMP file, but uses a feature this crate does not handle.
    UnsupportedError(String),
    IoError(std::io::Error),
}

pub type ImageResult<T> = Result<T, ImageError>;

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ImageError::FormatError(ref e) => write!(f, "Format error: {}", e),
            ImageError::UnsupportedError(ref e) => write!(f, "Unsupported: {}", e),
            ImageError::IoError(ref e) => e.fmt(f),
        }
    }
}

impl Error for ImageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            ImageError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ImageError {
    fn from(err: std::io::Error) -> ImageError {
        ImageError::IoError(err)
    }
}

/// Size of the BITMAPFILEHEADER that starts every file.
pub(crate) const FILE_HEADER_SIZE: u32 = 14;
/// Size of a BITMAPINFOHEADER, the smallest info header this crate reads.
pub(crate) const BITMAPINFOHEADER_SIZE: u32 = 40;

/// Number of bytes in one stored row, including the padding up to a multiple of 4.
pub(crate) fn row_byte_length(width: u32, bits_per_pixel: u16) -> u64 {
    (u64::from(bits_per_pixel) * u64::from(width) + 31) / 32 * 4
}

mod decoder;
mod encoder;
mod image;
