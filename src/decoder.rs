use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace, warn};

use crate::image::{BmpImage, PaletteEntry, Pixels, Rgb};
use crate::{row_byte_length, ImageError, ImageResult, BITMAPINFOHEADER_SIZE, FILE_HEADER_SIZE};

const BITMAPV2HEADER_SIZE: u32 = 52;
const BITMAPV3HEADER_SIZE: u32 = 56;
const BITMAPV4HEADER_SIZE: u32 = 108;
const BITMAPV5HEADER_SIZE: u32 = 124;

const BYTES_PER_COLOR: usize = 4;

/// Bounds on the dimensions the decoder accepts, checked before any pixel
/// memory is allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Limits {
    pub fn no_limits() -> Limits {
        Limits {
            max_width: u32::max_value(),
            max_height: u32::max_value(),
        }
    }
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            max_width: 17_000,
            max_height: 17_000,
        }
    }
}

/// A bmp decoder
///
/// Construction reads the file header, the info header and the color table.
/// The pixel array is read by [`BMPDecoder::read_image`].
pub struct BMPDecoder<R> {
    r: R,
    limits: Limits,

    file_size: u32,
    reserved: u32,
    data_offset: u32,

    info_header_size: u32,
    width: u32,
    height: i32,
    planes: u16,
    bit_count: u16,
    compression: u32,
    image_size: u32,
    x_pixels_per_meter: u32,
    y_pixels_per_meter: u32,
    colors_used: u32,
    important_colors: u32,
    header_extension: Vec<u8>,

    palette: Option<Vec<PaletteEntry>>,
}

impl<R: Read> BMPDecoder<R> {
    /// Create a new decoder that decodes from the stream ```r```
    pub fn new(r: R) -> ImageResult<BMPDecoder<R>> {
        BMPDecoder::with_limits(r, Limits::default())
    }

    pub fn with_limits(r: R, limits: Limits) -> ImageResult<BMPDecoder<R>> {
        let mut decoder = BMPDecoder {
            r,
            limits,

            file_size: 0,
            reserved: 0,
            data_offset: 0,

            info_header_size: 0,
            width: 0,
            height: 0,
            planes: 0,
            bit_count: 0,
            compression: 0,
            image_size: 0,
            x_pixels_per_meter: 0,
            y_pixels_per_meter: 0,
            colors_used: 0,
            important_colors: 0,
            header_extension: Vec::new(),

            palette: None,
        };
        decoder.read_metadata()?;
        Ok(decoder)
    }

    /// Width and number of rows of the image.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height.wrapping_abs() as u32)
    }

    pub fn bits_per_pixel(&self) -> u16 {
        self.bit_count
    }

    /// Number of color table entries, after inferring the default for a stored `0`.
    pub fn colors_used(&self) -> u32 {
        self.colors_used
    }

    fn read_metadata(&mut self) -> ImageResult<()> {
        self.read_file_header()?;
        self.read_bitmap_info_header()?;
        self.check_limits()?;
        if self.bit_count <= 8 {
            self.read_palette()?;
        }
        self.skip_to_pixel_array()?;

        debug!(
            "BMP header: {}x{}, {} bpp, file size {}, image data size {}, data offset {}, colors used {}",
            self.width,
            self.height,
            self.bit_count,
            self.file_size,
            self.image_size,
            self.data_offset,
            self.colors_used
        );
        Ok(())
    }

    fn read_file_header(&mut self) -> ImageResult<()> {
        let mut signature = [0; 2];
        self.r.read_exact(&mut signature)?;

        if signature != b"BM"[..] {
            return Err(ImageError::FormatError("BMP signature not found".to_string()));
        }

        self.file_size = self.r.read_u32::<LittleEndian>()?;
        self.reserved = self.r.read_u32::<LittleEndian>()?;
        self.data_offset = self.r.read_u32::<LittleEndian>()?;

        Ok(())
    }

    fn read_bitmap_info_header(&mut self) -> ImageResult<()> {
        self.info_header_size = self.r.read_u32::<LittleEndian>()?;
        match self.info_header_size {
            BITMAPINFOHEADER_SIZE
            | BITMAPV2HEADER_SIZE
            | BITMAPV3HEADER_SIZE
            | BITMAPV4HEADER_SIZE
            | BITMAPV5HEADER_SIZE => {}
            size => {
                return Err(ImageError::UnsupportedError(format!(
                    "Unsupported Bitmap Header of {} bytes",
                    size
                )))
            }
        }

        let width = self.r.read_i32::<LittleEndian>()?;
        self.height = self.r.read_i32::<LittleEndian>()?;

        if width < 0 {
            return Err(ImageError::FormatError("Negative width".to_string()));
        }
        self.width = width as u32;

        if self.height == i32::min_value() {
            return Err(ImageError::FormatError("Invalid height".to_string()));
        }

        self.planes = self.r.read_u16::<LittleEndian>()?;
        if self.planes != 1 {
            warn!("BMP header declares {} color planes, expected 1", self.planes);
        }

        self.bit_count = self.r.read_u16::<LittleEndian>()?;
        match self.bit_count {
            8 | 24 => {}
            n => {
                return Err(ImageError::UnsupportedError(format!(
                    "Unsupported bit count {}, only 8 and 24 bits per pixel are handled",
                    n
                )))
            }
        }

        self.compression = self.r.read_u32::<LittleEndian>()?;
        if self.compression != 0 {
            return Err(ImageError::UnsupportedError(format!(
                "Unsupported compression method {}",
                self.compression
            )));
        }

        self.image_size = self.r.read_u32::<LittleEndian>()?;
        self.x_pixels_per_meter = self.r.read_u32::<LittleEndian>()?;
        self.y_pixels_per_meter = self.r.read_u32::<LittleEndian>()?;
        self.colors_used = self.r.read_u32::<LittleEndian>()?;
        self.important_colors = self.r.read_u32::<LittleEndian>()?;

        let extension_len = (self.info_header_size - BITMAPINFOHEADER_SIZE) as usize;
        if extension_len > 0 {
            trace!("keeping {} bytes of extended info header", extension_len);
            self.header_extension = vec![0; extension_len];
            self.r.read_exact(&mut self.header_extension)?;
        }

        Ok(())
    }

    fn check_limits(&self) -> ImageResult<()> {
        let (width, height) = self.dimensions();
        if width > self.limits.max_width || height > self.limits.max_height {
            return Err(ImageError::FormatError(format!(
                "Image dimensions ({}x{}) exceed the limits ({}x{})",
                width, height, self.limits.max_width, self.limits.max_height
            )));
        }
        Ok(())
    }

    fn get_palette_size(&self) -> ImageResult<usize> {
        match self.colors_used {
            0 => Ok(1 << self.bit_count),
            _ => {
                if self.colors_used > 1 << self.bit_count {
                    return Err(ImageError::FormatError(format!(
                        "Palette size {} exceeds maximum size for BMP with bit count of {}",
                        self.colors_used, self.bit_count
                    )));
                }
                Ok(self.colors_used as usize)
            }
        }
    }

    fn read_palette(&mut self) -> ImageResult<()> {
        let palette_size = self.get_palette_size()?;
        let mut buf = vec![0; palette_size * BYTES_PER_COLOR];
        self.r.read_exact(&mut buf)?;

        let palette = buf
            .chunks(BYTES_PER_COLOR)
            .map(|c| PaletteEntry::new(c[0], c[1], c[2], c[3]))
            .collect();

        self.colors_used = palette_size as u32;
        self.palette = Some(palette);

        Ok(())
    }

    /// Consumes any gap between the color table and the pixel array.
    fn skip_to_pixel_array(&mut self) -> ImageResult<()> {
        let palette_len = self.palette.as_ref().map_or(0, Vec::len) as u64;
        let position = u64::from(FILE_HEADER_SIZE)
            + u64::from(self.info_header_size)
            + palette_len * BYTES_PER_COLOR as u64;
        let data_offset = u64::from(self.data_offset);

        if data_offset < position {
            warn!(
                "BMP data offset {} points inside the headers, reading pixels from {}",
                data_offset, position
            );
        } else if data_offset > position {
            let gap = data_offset - position;
            trace!("skipping {} bytes before the pixel array", gap);
            let skipped = io::copy(&mut self.r.by_ref().take(gap), &mut io::sink())?;
            if skipped != gap {
                return Err(ImageError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "BMP data offset is past the end of the file",
                )));
            }
        }
        Ok(())
    }

    /// Reads one stored row, padding included, into `row`.
    ///
    /// The buffer only grows as bytes arrive, so a header claiming huge rows
    /// fails with `UnexpectedEof` on a short stream instead of allocating upfront.
    fn read_row(&mut self, row: &mut Vec<u8>, row_byte_length: u64) -> ImageResult<()> {
        row.clear();
        let read = (&mut self.r).take(row_byte_length).read_to_end(row)?;
        if read as u64 != row_byte_length {
            return Err(ImageError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "BMP pixel array is truncated",
            )));
        }
        Ok(())
    }

    fn read_palettized_pixel_data(&mut self) -> ImageResult<Vec<u8>> {
        let (width, height) = self.dimensions();
        let row_byte_length = row_byte_length(width, self.bit_count);
        let mut row = Vec::new();
        let mut indices = Vec::new();

        for _ in 0..height {
            self.read_row(&mut row, row_byte_length)?;
            indices.extend_from_slice(&row[..width as usize]);
        }

        Ok(indices)
    }

    fn read_rgb_pixel_data(&mut self) -> ImageResult<Vec<Rgb>> {
        let (width, height) = self.dimensions();
        let row_byte_length = row_byte_length(width, self.bit_count);
        let mut row = Vec::new();
        let mut pixels = Vec::new();

        for _ in 0..height {
            self.read_row(&mut row, row_byte_length)?;
            pixels.extend(
                row[..width as usize * 3]
                    .chunks(3)
                    .map(|bgr| Rgb::new(bgr[2], bgr[1], bgr[0])),
            );
        }

        Ok(pixels)
    }

    /// Reads the pixel array and returns the complete image.
    pub fn read_image(mut self) -> ImageResult<BmpImage> {
        let pixels = match self.palette.take() {
            Some(palette) => Pixels::Indexed {
                palette,
                indices: self.read_palettized_pixel_data()?,
            },
            None => Pixels::Rgb(self.read_rgb_pixel_data()?),
        };

        Ok(BmpImage {
            file_size: self.file_size,
            reserved: self.reserved,
            data_offset: self.data_offset,

            info_header_size: self.info_header_size,
            width: self.width,
            height: self.height,
            planes: self.planes,
            compression: self.compression,
            image_size: self.image_size,
            x_pixels_per_meter: self.x_pixels_per_meter,
            y_pixels_per_meter: self.y_pixels_per_meter,
            colors_used: self.colors_used,
            important_colors: self.important_colors,
            header_extension: self.header_extension,

            pixels,
        })
    }
}
