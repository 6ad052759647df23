use crate::common::*;

#[derive(Debug, Clone)]
pub struct BatchNormInit {
    pub eps: f64,
    pub momentum: f64,
    pub ws_init: nn::Init,
    pub bs_init: nn::Init,
}

impl Default for BatchNormInit {
    fn default() -> Self {
        Self {
            eps: 1e-5,
            momentum: 0.1,
            ws_init: nn::Init::Const(1.0),
            bs_init: nn::Init::Const(0.0),
        }
    }
}

impl BatchNormInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, out_dim: usize) -> BatchNorm {
        let path = path.borrow();
        let Self {
            eps,
            momentum,
            ws_init,
            bs_init,
        } = self;
        let out_dim = out_dim as i64;

        BatchNorm {
            running_mean: path.zeros_no_train("running_mean", &[out_dim]),
            running_var: path.ones_no_train("running_var", &[out_dim]),
            ws: path.var("weight", &[out_dim], ws_init),
            bs: path.var("bias", &[out_dim], bs_init),
            eps,
            momentum,
        }
    }
}

/// Batch normalization over `[batch, channel, height, width]` inputs.
///
/// Running statistics are updated in place in training mode.
#[derive(Debug)]
pub struct BatchNorm {
    running_mean: Tensor,
    running_var: Tensor,
    ws: Tensor,
    bs: Tensor,
    eps: f64,
    momentum: f64,
}

impl BatchNorm {
    pub fn set_trainable(&self, trainable: bool) {
        let _ = self.ws.set_requires_grad(trainable);
        let _ = self.bs.set_requires_grad(trainable);
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let Self {
            ref running_mean,
            ref running_var,
            ref ws,
            ref bs,
            momentum,
            eps,
        } = *self;

        ensure!(
            input.dim() == 4,
            "expected an input tensor with 4 dims, got {:?}",
            input.size()
        );

        Ok(Tensor::batch_norm(
            input,
            Some(ws),
            Some(bs),
            Some(running_mean),
            Some(running_var),
            train,
            momentum,
            eps,
            true,
        ))
    }
}
