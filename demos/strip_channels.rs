//! Writes a copy of each BMP file given on the command line, plus one copy with
//! each of the red, green and blue channels removed.
//!
//! `cargo run --example strip_channels -- cameraman.bmp corn.bmp pepper.bmp`

use std::env;
use std::path::{Path, PathBuf};
use std::process;

use bmp_channel::{BmpImage, Channel, ImageResult};

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}_{}.bmp", stem, suffix))
}

fn process_file(path: &Path) -> ImageResult<()> {
    let image = BmpImage::open(path)?;

    println!("-------------------------------------------------");
    println!("File name : {}", path.display());
    println!("Height : {}", image.height());
    println!("Width : {}", image.width());
    println!("Bit Depth : {}", image.bits_per_pixel());
    println!("File Size : {}", image.file_size());
    println!("Image Data Size : {}", image.image_size());
    println!("Data Offset : {}", image.data_offset());
    println!("Colors Used : {}", image.colors_used());
    println!("-------------------------------------------------");

    image.save(sibling(path, "copy"))?;
    for &(channel, suffix) in &[
        (Channel::Red, "no_red"),
        (Channel::Green, "no_green"),
        (Channel::Blue, "no_blue"),
    ] {
        image.save_without_channel(channel, sibling(path, suffix))?;
    }
    Ok(())
}

fn main() {
    let paths: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        eprintln!("usage: strip_channels <image.bmp>...");
        process::exit(2);
    }

    let mut failed = false;
    for path in &paths {
        println!("\nProcessing: {}", path.display());
        if let Err(e) = process_file(path) {
            eprintln!("{}: {}", path.display(), e);
            failed = true;
        }
    }
    if failed {
        process::exit(1);
    }
}
