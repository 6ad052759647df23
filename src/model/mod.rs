mod batch_norm;
mod cond_inst_norm;
mod conv;
mod decoder;
mod discriminator;
mod embedding;
mod encoder;
mod gegan;
mod generator;
mod loss;
mod misc;
mod perceptual;

pub use batch_norm::*;
pub use cond_inst_norm::*;
pub use conv::*;
pub use decoder::*;
pub use discriminator::*;
pub use embedding::*;
pub use encoder::*;
pub use gegan::*;
pub use generator::*;
pub use loss::*;
pub use misc::*;
pub use perceptual::*;
