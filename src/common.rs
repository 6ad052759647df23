pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use chrono::Local;
pub use futures::{
    future::FutureExt,
    stream::{self, Stream, StreamExt, TryStreamExt},
};
pub use itertools::{izip, Itertools};
pub use noisy_float::prelude::*;
pub use par_stream::prelude::*;
pub use rand::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    fs, iter,
    num::NonZeroUsize,
    ops::{Add, Div, Mul},
    path::{Path, PathBuf},
    sync::Arc,
};
pub use tch::{
    kind::FLOAT_CPU,
    nn::{self, OptimizerConfig},
    vision, Device, Kind, Reduction, Tensor,
};
pub use tch_tensor_like::TensorLike;
pub use tokio::sync::mpsc;
pub use tracing::{debug, info, warn};

pub type Fallible<T> = Result<T>;
