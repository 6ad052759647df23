use crate::common::*;

pub const WEIGHT_STDDEV: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct Conv2DInit {
    pub ksize: usize,
    pub stride: usize,
    pub padding: usize,
    pub output_padding: usize,
    pub transposed: bool,
    pub bias: bool,
    pub ws_init: nn::Init,
    pub bs_init: nn::Init,
}

impl Conv2DInit {
    pub fn new(ksize: usize) -> Self {
        Self {
            ksize,
            stride: 1,
            padding: ksize / 2,
            output_padding: 0,
            transposed: false,
            bias: true,
            ws_init: nn::Init::Randn {
                mean: 0.0,
                stdev: WEIGHT_STDDEV,
            },
            bs_init: nn::Init::Const(0.0),
        }
    }

    /// Kernel 5, stride 2 convolution which halves the spatial size.
    pub fn down_sample() -> Self {
        Self {
            stride: 2,
            ..Self::new(5)
        }
    }

    /// Kernel 5, stride 2 transposed convolution which doubles the spatial size.
    pub fn up_sample() -> Self {
        Self {
            stride: 2,
            output_padding: 1,
            transposed: true,
            ..Self::new(5)
        }
    }

    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Conv2D> {
        let Self {
            ksize,
            stride,
            padding,
            output_padding,
            transposed,
            bias,
            ws_init,
            bs_init,
        } = self;

        ensure!(ksize > 0 && stride > 0, "ksize and stride must be positive");
        ensure!(
            in_dim > 0 && out_dim > 0,
            "in_dim and out_dim must be positive"
        );
        ensure!(
            transposed || output_padding == 0,
            "output_padding is only allowed for transposed convolution"
        );
        ensure!(
            output_padding < stride,
            "output_padding must be smaller than stride"
        );

        let path = path.borrow();
        let in_dim = in_dim as i64;
        let out_dim = out_dim as i64;
        let ksize = ksize as i64;

        let bs = bias.then(|| path.var("bias", &[out_dim], bs_init));
        let ws = {
            // transposed kernels are laid out as [in, out, k, k]
            let weight_size = if transposed {
                [in_dim, out_dim, ksize, ksize]
            } else {
                [out_dim, in_dim, ksize, ksize]
            };
            path.var("weight", &weight_size, ws_init)
        };

        Ok(Conv2D {
            stride: vec![stride as i64; 2],
            padding: vec![padding as i64; 2],
            dilation: vec![1; 2],
            output_padding: vec![output_padding as i64; 2],
            transposed,
            weight: ws,
            bias: bs,
        })
    }
}

#[derive(Debug)]
pub struct Conv2D {
    stride: Vec<i64>,
    padding: Vec<i64>,
    dilation: Vec<i64>,
    output_padding: Vec<i64>,
    transposed: bool,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Conv2D {
    pub fn set_trainable(&self, trainable: bool) {
        let Self { weight, bias, .. } = self;
        let _ = weight.set_requires_grad(trainable);
        if let Some(bias) = bias {
            let _ = bias.set_requires_grad(trainable);
        }
    }

    pub fn forward(&self, input: &Tensor) -> Tensor {
        let Self {
            ref stride,
            ref padding,
            ref dilation,
            ref output_padding,
            transposed,
            ref weight,
            ref bias,
        } = *self;

        input.convolution(
            weight,
            bias.as_ref(),
            stride,
            padding,
            dilation,
            transposed,
            output_padding,
            1, // groups
        )
    }
}
