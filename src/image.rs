//! In-memory representation of a decoded BMP file and the channel transforms
//! that operate on it.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::{trace, warn};

use crate::decoder::BMPDecoder;
use crate::encoder::BMPEncoder;
use crate::{row_byte_length, ImageError, ImageResult, BITMAPINFOHEADER_SIZE};

/// Resolution written by the in-memory constructors, 72 DPI.
const DEFAULT_PIXELS_PER_METER: u32 = 2835;

/// One of the three color components of a pixel or palette entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

/// A 24-bit true color pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Rgb {
        Rgb { r, g, b }
    }

    /// Unpacks a `0xRRGGBB` value. Bits above the low 24 are ignored.
    pub fn from_packed(value: u32) -> Rgb {
        Rgb {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        }
    }

    /// Packs the pixel as `(r << 16) | (g << 8) | b`.
    pub fn to_packed(self) -> u32 {
        u32::from(self.r) << 16 | u32::from(self.g) << 8 | u32::from(self.b)
    }

    pub fn with_channel_zeroed(self, channel: Channel) -> Rgb {
        match channel {
            Channel::Red => Rgb { r: 0, ..self },
            Channel::Green => Rgb { g: 0, ..self },
            Channel::Blue => Rgb { b: 0, ..self },
        }
    }
}

/// A color table entry, stored on disk as `[blue, green, red, reserved]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PaletteEntry {
    pub blue: u8,
    pub green: u8,
    pub red: u8,
    pub reserved: u8,
}

impl PaletteEntry {
    pub fn new(blue: u8, green: u8, red: u8, reserved: u8) -> PaletteEntry {
        PaletteEntry {
            blue,
            green,
            red,
            reserved,
        }
    }

    pub fn with_channel_zeroed(self, channel: Channel) -> PaletteEntry {
        match channel {
            Channel::Red => PaletteEntry { red: 0, ..self },
            Channel::Green => PaletteEntry { green: 0, ..self },
            Channel::Blue => PaletteEntry { blue: 0, ..self },
        }
    }
}

/// The pixel grid of an image, row-major with rows in file order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pixels {
    /// 8 bits per pixel: indices into `palette`.
    Indexed {
        palette: Vec<PaletteEntry>,
        indices: Vec<u8>,
    },
    /// 24 bits per pixel.
    Rgb(Vec<Rgb>),
}

impl Pixels {
    pub fn bits_per_pixel(&self) -> u16 {
        match *self {
            Pixels::Indexed { .. } => 8,
            Pixels::Rgb(_) => 24,
        }
    }

    fn len(&self) -> usize {
        match *self {
            Pixels::Indexed { ref indices, .. } => indices.len(),
            Pixels::Rgb(ref pixels) => pixels.len(),
        }
    }
}

/// A borrowed row of pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Row<'a> {
    Indexed(&'a [u8]),
    Rgb(&'a [Rgb]),
}

/// A decoded BMP image.
///
/// Header fields are carried through unchanged from the file they were read from,
/// except for the file size and data offset, which the encoder recomputes. The
/// signature is always `BM`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BmpImage {
    pub(crate) file_size: u32,
    pub(crate) reserved: u32,
    pub(crate) data_offset: u32,

    pub(crate) info_header_size: u32,
    pub(crate) width: u32,
    pub(crate) height: i32,
    pub(crate) planes: u16,
    pub(crate) compression: u32,
    pub(crate) image_size: u32,
    pub(crate) x_pixels_per_meter: u32,
    pub(crate) y_pixels_per_meter: u32,
    pub(crate) colors_used: u32,
    pub(crate) important_colors: u32,
    /// Fields of V4 and V5 info headers past the first 40 bytes.
    pub(crate) header_extension: Vec<u8>,

    pub(crate) pixels: Pixels,
}

impl BmpImage {
    /// Builds a 24-bit image. `pixels` holds `height` rows of `width` pixels in
    /// file order.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<Rgb>) -> ImageResult<BmpImage> {
        BmpImage::from_pixels(width, height, Pixels::Rgb(pixels))
    }

    /// Builds an 8-bit palette image.
    pub fn from_indexed(
        width: u32,
        height: u32,
        palette: Vec<PaletteEntry>,
        indices: Vec<u8>,
    ) -> ImageResult<BmpImage> {
        if palette.is_empty() || palette.len() > 256 {
            return Err(ImageError::FormatError(format!(
                "Palette must have between 1 and 256 entries, got {}",
                palette.len()
            )));
        }
        BmpImage::from_pixels(width, height, Pixels::Indexed { palette, indices })
    }

    fn from_pixels(width: u32, height: u32, pixels: Pixels) -> ImageResult<BmpImage> {
        if width > i32::max_value() as u32 || height > i32::max_value() as u32 {
            return Err(ImageError::FormatError(format!(
                "Image dimensions ({}x{}) are out of range",
                width, height
            )));
        }
        let expected = u64::from(width) * u64::from(height);
        if pixels.len() as u64 != expected {
            return Err(ImageError::FormatError(format!(
                "Expected {} pixels for a {}x{} image, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }

        let image_size = row_byte_length(width, pixels.bits_per_pixel()) * u64::from(height);
        if image_size > u64::from(u32::max_value()) {
            return Err(ImageError::UnsupportedError(
                "Image is too large for the BMP size fields".to_string(),
            ));
        }
        let colors_used = match pixels {
            Pixels::Indexed { ref palette, .. } => palette.len() as u32,
            Pixels::Rgb(_) => 0,
        };

        let mut image = BmpImage {
            file_size: 0,
            reserved: 0,
            data_offset: 0,
            info_header_size: BITMAPINFOHEADER_SIZE,
            width,
            height: height as i32,
            planes: 1,
            compression: 0,
            image_size: image_size as u32,
            x_pixels_per_meter: DEFAULT_PIXELS_PER_METER,
            y_pixels_per_meter: DEFAULT_PIXELS_PER_METER,
            colors_used,
            important_colors: 0,
            header_extension: Vec::new(),
            pixels,
        };
        let layout = crate::encoder::Layout::of(&image)?;
        image.file_size = layout.file_size;
        image.data_offset = layout.data_offset;
        Ok(image)
    }

    /// Decodes an image from a byte stream positioned at the start of the file.
    pub fn decode<R: Read>(r: R) -> ImageResult<BmpImage> {
        BMPDecoder::new(r)?.read_image()
    }

    /// Encodes the image as BMP bytes.
    pub fn encode<W: Write>(&self, w: &mut W) -> ImageResult<()> {
        BMPEncoder::new(w).encode(self)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> ImageResult<BmpImage> {
        let f = BufReader::new(File::open(path)?);
        BmpImage::decode(f)
    }

    /// Writes the image to `path`.
    ///
    /// The data goes to a temporary file next to `path` which is renamed over the
    /// destination once it is complete, so a failed save never leaves a truncated
    /// file behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        write_atomically(path.as_ref(), |w| self.encode(w))
    }

    /// Returns a copy of the image with one channel set to zero.
    ///
    /// Palette images keep their indices and have the channel cleared in every
    /// color table entry. True color images have the channel cleared in every
    /// pixel.
    pub fn with_channel_zeroed(&self, channel: Channel) -> BmpImage {
        let pixels = match self.pixels {
            Pixels::Indexed {
                ref palette,
                ref indices,
            } => Pixels::Indexed {
                palette: palette
                    .iter()
                    .map(|entry| entry.with_channel_zeroed(channel))
                    .collect(),
                indices: indices.clone(),
            },
            Pixels::Rgb(ref pixels) => Pixels::Rgb(
                pixels
                    .iter()
                    .map(|px| px.with_channel_zeroed(channel))
                    .collect(),
            ),
        };
        BmpImage {
            pixels,
            header_extension: self.header_extension.clone(),
            ..*self
        }
    }

    /// Encodes a copy of the image with `channel` zeroed. `self` is left untouched.
    pub fn remove_channel<W: Write>(&self, channel: Channel, w: &mut W) -> ImageResult<()> {
        self.with_channel_zeroed(channel).encode(w)
    }

    pub fn save_without_channel<P: AsRef<Path>>(
        &self,
        channel: Channel,
        path: P,
    ) -> ImageResult<()> {
        write_atomically(path.as_ref(), |w| self.remove_channel(channel, w))
    }

    pub fn remove_red<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        self.save_without_channel(Channel::Red, path)
    }

    pub fn remove_green<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        self.save_without_channel(Channel::Green, path)
    }

    pub fn remove_blue<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        self.save_without_channel(Channel::Blue, path)
    }

    pub fn signature(&self) -> [u8; 2] {
        *b"BM"
    }

    /// File size as stored in the file this image was decoded from.
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Pixel data offset as stored in the file this image was decoded from.
    pub fn data_offset(&self) -> u32 {
        self.data_offset
    }

    pub fn info_header_size(&self) -> u32 {
        self.info_header_size
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of pixel rows, regardless of storage order.
    pub fn height(&self) -> u32 {
        self.height.wrapping_abs() as u32
    }

    /// The height field as stored. Negative for top-down bitmaps.
    pub fn raw_height(&self) -> i32 {
        self.height
    }

    /// Whether the first row in the file is the top row of the picture.
    pub fn is_top_down(&self) -> bool {
        self.height < 0
    }

    pub fn planes(&self) -> u16 {
        self.planes
    }

    pub fn bits_per_pixel(&self) -> u16 {
        self.pixels.bits_per_pixel()
    }

    pub fn compression(&self) -> u32 {
        self.compression
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn x_pixels_per_meter(&self) -> u32 {
        self.x_pixels_per_meter
    }

    pub fn y_pixels_per_meter(&self) -> u32 {
        self.y_pixels_per_meter
    }

    /// Number of color table entries. For palette images decoded from a file
    /// that stored `0` here, this is the inferred `2^bits_per_pixel`.
    pub fn colors_used(&self) -> u32 {
        self.colors_used
    }

    pub fn important_colors(&self) -> u32 {
        self.important_colors
    }

    pub fn has_color_table(&self) -> bool {
        self.color_table().is_some()
    }

    pub fn color_table(&self) -> Option<&[PaletteEntry]> {
        match self.pixels {
            Pixels::Indexed { ref palette, .. } => Some(&palette[..]),
            Pixels::Rgb(_) => None,
        }
    }

    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    /// Returns row `y`, counted in file order.
    pub fn row(&self, y: u32) -> Option<Row<'_>> {
        if y >= self.height() {
            return None;
        }
        let width = self.width as usize;
        let start = y as usize * width;
        match self.pixels {
            Pixels::Indexed { ref indices, .. } => {
                indices.get(start..start + width).map(Row::Indexed)
            }
            Pixels::Rgb(ref pixels) => pixels.get(start..start + width).map(Row::Rgb),
        }
    }

    /// Rows in the order they are stored in the file.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.height()).filter_map(move |y| self.row(y))
    }

    /// Rows from the top of the picture to the bottom.
    pub fn display_rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        let height = self.height();
        let top_down = self.is_top_down();
        (0..height).filter_map(move |i| {
            let y = if top_down { i } else { height - 1 - i };
            self.row(y)
        })
    }

    /// The value of the pixel at column `x` of file row `y`: a palette index for
    /// 8-bit images or a packed `0xRRGGBB` value for 24-bit images.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width {
            return None;
        }
        match self.row(y)? {
            Row::Indexed(row) => Some(u32::from(row[x as usize])),
            Row::Rgb(row) => Some(row[x as usize].to_packed()),
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_atomically<F>(path: &Path, write: F) -> ImageResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> ImageResult<()>,
{
    let tmp = partial_path(path);
    trace!("writing {} via {}", path.display(), tmp.display());

    let result = File::create(&tmp)
        .map_err(ImageError::from)
        .and_then(|f| {
            let mut w = BufWriter::new(f);
            write(&mut w)?;
            w.flush()?;
            w.get_ref().sync_all()?;
            Ok(())
        })
        .and_then(|()| fs::rename(&tmp, path).map_err(ImageError::from));

    if result.is_err() {
        match fs::remove_file(&tmp) {
            Err(ref e) if e.kind() != io::ErrorKind::NotFound => {
                warn!("could not remove {}: {}", tmp.display(), e);
            }
            _ => {}
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use std::env;
    use std::process;

    fn palette_image() -> BmpImage {
        let palette = vec![PaletteEntry::new(10, 20, 30, 0), PaletteEntry::new(1, 2, 3, 0)];
        BmpImage::from_indexed(2, 2, palette, vec![0, 1, 1, 0]).unwrap()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("bmp-channel-{}-{}", name, process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_packed_rgb() {
        let px = Rgb::from_packed(0xAABBCC);
        assert_eq!(px, Rgb::new(0xAA, 0xBB, 0xCC));
        assert_eq!(px.to_packed(), 0xAABBCC);
        assert_eq!(Rgb::from_packed(0xFF12_3456), Rgb::new(0x12, 0x34, 0x56));
    }

    #[test]
    fn test_zero_rgb_channels() {
        let image = BmpImage::from_rgb(1, 1, vec![Rgb::from_packed(0xAABBCC)]).unwrap();
        assert_eq!(image.with_channel_zeroed(Channel::Red).pixel(0, 0), Some(0x00BBCC));
        assert_eq!(image.with_channel_zeroed(Channel::Green).pixel(0, 0), Some(0xAA00CC));
        assert_eq!(image.with_channel_zeroed(Channel::Blue).pixel(0, 0), Some(0xAABB00));
        assert_eq!(image.pixel(0, 0), Some(0xAABBCC));
    }

    #[test]
    fn test_zero_palette_channel_keeps_indices() {
        let image = palette_image();
        let no_green = image.with_channel_zeroed(Channel::Green);

        assert_eq!(
            no_green.color_table().unwrap()[0],
            PaletteEntry::new(10, 0, 30, 0)
        );
        assert_eq!(no_green.pixels_indices(), image.pixels_indices());
        assert_eq!(
            image.color_table().unwrap()[0],
            PaletteEntry::new(10, 20, 30, 0)
        );
    }

    #[test]
    fn test_shareable_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BmpImage>();

        let image = std::sync::Arc::new(palette_image());
        let handles: Vec<_> = [Channel::Red, Channel::Green, Channel::Blue]
            .iter()
            .map(|&channel| {
                let image = image.clone();
                std::thread::spawn(move || image.with_channel_zeroed(channel))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*image, palette_image());
    }

    #[test]
    fn test_constructor_rejects_bad_sizes() {
        match BmpImage::from_rgb(2, 2, vec![Rgb::default(); 3]) {
            Err(ImageError::FormatError(_)) => {}
            other => panic!("expected a format error, got {:?}", other),
        }
        match BmpImage::from_indexed(1, 1, Vec::new(), vec![0]) {
            Err(ImageError::FormatError(_)) => {}
            other => panic!("expected a format error, got {:?}", other),
        }
        match BmpImage::from_indexed(1, 1, vec![PaletteEntry::default(); 257], vec![0]) {
            Err(ImageError::FormatError(_)) => {}
            other => panic!("expected a format error, got {:?}", other),
        }
    }

    #[test]
    fn test_constructor_header_fields() {
        let image = palette_image();
        assert_eq!(image.info_header_size(), 40);
        assert_eq!(image.colors_used(), 2);
        assert_eq!(image.bits_per_pixel(), 8);
        assert_eq!(image.data_offset(), 14 + 40 + 8);
        assert_eq!(image.image_size(), 8);
        assert_eq!(image.file_size(), 14 + 40 + 8 + 8);
    }

    #[test]
    fn test_display_rows() {
        let pixels = (0..6).map(|i| Rgb::new(i, 0, 0)).collect();
        let image = BmpImage::from_rgb(2, 3, pixels).unwrap();
        assert!(!image.is_top_down());

        let first: Vec<_> = image.display_rows().map(|row| match row {
            Row::Rgb(row) => row[0].r,
            Row::Indexed(_) => unreachable!(),
        }).collect();
        assert_eq!(first, vec![4, 2, 0]);
        assert_eq!(image.rows().count(), 3);
        assert_eq!(image.row(3), None);
        assert_eq!(image.pixel(2, 0), None);
    }

    #[test]
    fn test_save_and_remove_channels() {
        let dir = scratch_dir("save");
        let image = palette_image();

        image.save(dir.join("copy.bmp")).unwrap();
        image.remove_red(dir.join("no_red.bmp")).unwrap();
        image.remove_green(dir.join("no_green.bmp")).unwrap();
        image.remove_blue(dir.join("no_blue.bmp")).unwrap();

        assert_eq!(BmpImage::open(dir.join("copy.bmp")).unwrap(), image);
        let cases = [
            ("no_red.bmp", PaletteEntry::new(10, 20, 0, 0)),
            ("no_green.bmp", PaletteEntry::new(10, 0, 30, 0)),
            ("no_blue.bmp", PaletteEntry::new(0, 20, 30, 0)),
        ];
        for &(name, expected) in cases.iter() {
            let decoded = BmpImage::open(dir.join(name)).unwrap();
            assert_eq!(decoded.color_table().unwrap()[0], expected, "{}", name);
            assert_eq!(decoded.pixels_indices(), image.pixels_indices());
        }
        assert!(!dir.join("copy.bmp.partial").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_save_leaves_no_file() {
        let dir = scratch_dir("missing");
        let target = dir.join("does-not-exist").join("out.bmp");
        match palette_image().save(&target) {
            Err(ImageError::IoError(_)) => {}
            other => panic!("expected an io error, got {:?}", other),
        }
        assert!(!target.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_rename_removes_partial_file() {
        let dir = scratch_dir("rename");
        // A non-empty directory cannot be replaced by a file.
        let target = dir.join("out.bmp");
        fs::create_dir_all(target.join("inner")).unwrap();

        match palette_image().save(&target) {
            Err(ImageError::IoError(_)) => {}
            other => panic!("expected an io error, got {:?}", other),
        }
        assert!(target.is_dir());
        assert!(!partial_path(&target).exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    impl BmpImage {
        fn pixels_indices(&self) -> &[u8] {
            match self.pixels {
                Pixels::Indexed { ref indices, .. } => indices,
                Pixels::Rgb(_) => panic!("not a palette image"),
            }
        }
    }
}
