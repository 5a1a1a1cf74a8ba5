//! Binary encodings: primitives, raw dataset buffers and container images.

pub mod buffer;
pub mod image;
pub mod primitives;

pub use buffer::{decode_elements, encode_elements};
pub use image::{compat_header, decode_image, encode_image, has_compat_header};
pub use primitives::{zigzag_decode, zigzag_encode, Reader, Writer};
