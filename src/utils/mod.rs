pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{
    capped_dimensions, decode_image, encode_png, encode_png_async, prepare_image,
    prepare_image_async, PreparedImage,
};
pub use metrics::{Metrics, MetricsSnapshot};
