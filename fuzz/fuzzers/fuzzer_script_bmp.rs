#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate bmp_channel;

use bmp_channel::{BMPDecoder, BmpImage, Channel, Limits};

fuzz_target!(|data: &[u8]| {
    let limits = Limits {
        max_width: 4096,
        max_height: 4096,
    };
    let image = match BMPDecoder::with_limits(data, limits).and_then(|d| d.read_image()) {
        Ok(image) => image,
        Err(_) => return,
    };

    let mut encoded = Vec::new();
    image.encode(&mut encoded).expect("decoded image failed to encode");
    let decoded = BmpImage::decode(&encoded[..]).expect("encoded image failed to decode");
    assert_eq!(decoded.pixels(), image.pixels());

    let mut stripped = Vec::new();
    image
        .remove_channel(Channel::Green, &mut stripped)
        .expect("channel removal failed");
});
