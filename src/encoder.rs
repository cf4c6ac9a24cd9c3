use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::image::{BmpImage, PaletteEntry, Pixels, Rgb};
use crate::{row_byte_length, ImageError, ImageResult, FILE_HEADER_SIZE};

/// Offsets and sizes derived from an image's current fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Layout {
    pub(crate) data_offset: u32,
    pub(crate) row_size: usize,
    pub(crate) file_size: u32,
}

impl Layout {
    pub(crate) fn of(image: &BmpImage) -> ImageResult<Layout> {
        let color_table_size = image.color_table().map_or(0, |table| table.len() as u64 * 4);
        let data_offset =
            u64::from(FILE_HEADER_SIZE) + u64::from(image.info_header_size) + color_table_size;
        let row_size = row_byte_length(image.width(), image.bits_per_pixel());
        let file_size = row_size
            .checked_mul(u64::from(image.height()))
            .and_then(|pixel_bytes| pixel_bytes.checked_add(data_offset))
            .filter(|&size| size <= u64::from(u32::max_value()))
            .ok_or_else(|| {
                ImageError::UnsupportedError(
                    "Image is too large for the BMP size fields".to_string(),
                )
            })?;

        Ok(Layout {
            data_offset: data_offset as u32,
            row_size: row_size as usize,
            file_size: file_size as u32,
        })
    }
}

/// The representation of a BMP encoder.
pub struct BMPEncoder<'a, W: 'a> {
    writer: &'a mut W,
}

impl<'a, W: Write + 'a> BMPEncoder<'a, W> {
    /// Create a new encoder that writes its output to ```w```.
    pub fn new(w: &'a mut W) -> Self {
        BMPEncoder { writer: w }
    }

    /// Encodes the image.
    ///
    /// The file size and data offset are recomputed from the image instead of
    /// taken from the values it was decoded with, and the reserved field is
    /// written as zero. All other header fields are written unchanged.
    pub fn encode(&mut self, image: &BmpImage) -> ImageResult<()> {
        let layout = Layout::of(image)?;

        self.write_file_header(&layout)?;
        self.write_info_header(image)?;

        match *image.pixels() {
            Pixels::Indexed {
                ref palette,
                ref indices,
            } => {
                self.write_palette(palette)?;
                self.encode_indexed(indices, image.width(), layout.row_size)?;
            }
            Pixels::Rgb(ref pixels) => self.encode_rgb(pixels, image.width(), layout.row_size)?,
        }

        Ok(())
    }

    fn write_file_header(&mut self, layout: &Layout) -> ImageResult<()> {
        self.writer.write_all(b"BM")?;
        self.writer.write_u32::<LittleEndian>(layout.file_size)?;
        self.writer.write_u32::<LittleEndian>(0)?; // reserved
        self.writer.write_u32::<LittleEndian>(layout.data_offset)?;
        Ok(())
    }

    fn write_info_header(&mut self, image: &BmpImage) -> ImageResult<()> {
        self.writer.write_u32::<LittleEndian>(image.info_header_size)?;
        self.writer.write_i32::<LittleEndian>(image.width as i32)?;
        self.writer.write_i32::<LittleEndian>(image.height)?;
        self.writer.write_u16::<LittleEndian>(image.planes)?;
        self.writer.write_u16::<LittleEndian>(image.bits_per_pixel())?;
        self.writer.write_u32::<LittleEndian>(image.compression)?;
        self.writer.write_u32::<LittleEndian>(image.image_size)?;
        self.writer.write_u32::<LittleEndian>(image.x_pixels_per_meter)?;
        self.writer.write_u32::<LittleEndian>(image.y_pixels_per_meter)?;
        self.writer.write_u32::<LittleEndian>(image.colors_used)?;
        self.writer.write_u32::<LittleEndian>(image.important_colors)?;
        self.writer.write_all(&image.header_extension)?;
        Ok(())
    }

    fn write_palette(&mut self, palette: &[PaletteEntry]) -> ImageResult<()> {
        for entry in palette {
            self.writer
                .write_all(&[entry.blue, entry.green, entry.red, entry.reserved])?;
        }
        Ok(())
    }

    fn encode_indexed(&mut self, indices: &[u8], width: u32, row_size: usize) -> ImageResult<()> {
        // zero width rows are empty, padding included
        if width == 0 {
            return Ok(());
        }
        let mut row_buf = vec![0; row_size];
        for row in indices.chunks(width as usize) {
            row_buf[..row.len()].copy_from_slice(row);
            self.writer.write_all(&row_buf)?;
        }
        Ok(())
    }

    fn encode_rgb(&mut self, pixels: &[Rgb], width: u32, row_size: usize) -> ImageResult<()> {
        if width == 0 {
            return Ok(());
        }
        let mut row_buf = vec![0; row_size];
        for row in pixels.chunks(width as usize) {
            for (px, bgr) in row.iter().zip(row_buf.chunks_mut(3)) {
                bgr[0] = px.b;
                bgr[1] = px.g;
                bgr[2] = px.r;
            }
            self.writer.write_all(&row_buf)?;
        }
        Ok(())
    }
}
