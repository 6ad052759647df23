use super::embedding::validate_ids;
use crate::common::*;

#[derive(Debug, Clone)]
pub struct ConditionalInstanceNormInit {
    pub num_styles: usize,
    pub eps: f64,
}

impl ConditionalInstanceNormInit {
    pub fn new(num_styles: usize) -> Self {
        Self {
            num_styles,
            eps: 1e-5,
        }
    }

    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        out_dim: usize,
    ) -> ConditionalInstanceNorm {
        let path = path.borrow();
        let Self { num_styles, eps } = self;
        let shape = [num_styles as i64, out_dim as i64];

        ConditionalInstanceNorm {
            scale: path.var("scale", &shape, nn::Init::Const(1.0)),
            shift: path.var("shift", &shape, nn::Init::Const(0.0)),
            eps,
        }
    }
}

/// Instance normalization whose affine parameters are rows selected by style id.
#[derive(Debug)]
pub struct ConditionalInstanceNorm {
    scale: Tensor,
    shift: Tensor,
    eps: f64,
}

impl ConditionalInstanceNorm {
    pub fn forward(&self, input: &Tensor, style_ids: &Tensor) -> Result<Tensor> {
        let Self {
            ref scale,
            ref shift,
            eps,
        } = *self;
        let (bsize, channels, _h, _w) = input.size4()?;
        let (num_rows, scale_channels) = scale.size2()?;
        ensure!(
            channels == scale_channels,
            "expect {} channels, but get {}",
            scale_channels,
            channels
        );
        validate_ids(style_ids, bsize, num_rows)?;

        let mean = input.mean_dim(&[2, 3], true, Kind::Float);
        let var = (input - &mean).square().mean_dim(&[2, 3], true, Kind::Float);
        let normalized = (input - &mean) / (var + eps).sqrt();

        let batch_scale = scale.index_select(0, style_ids).view([bsize, channels, 1, 1]);
        let batch_shift = shift.index_select(0, style_ids).view([bsize, channels, 1, 1]);

        Ok(normalized * batch_scale + batch_shift)
    }

    /// Shallow handles of the per-style parameter tables.
    pub fn style_params(&self) -> Vec<Tensor> {
        vec![self.scale.shallow_clone(), self.shift.shallow_clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_instance_norm_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let norm = ConditionalInstanceNormInit::new(2).build(&vs.root() / "norm", 3);

        tch::no_grad(|| {
            let _ = norm.shift.get(1).fill_(5.0);
        });

        let input = Tensor::randn(&[2, 3, 4, 4], FLOAT_CPU);
        let ids = Tensor::of_slice(&[0i64, 1]);
        let output = norm.forward(&input, &ids)?;
        ensure!(output.size() == input.size(), "incorrect output shape");

        let means = output.mean_dim(&[1, 2, 3], false, Kind::Float);
        ensure!(f64::from(means.get(0)).abs() < 1e-4);
        ensure!((f64::from(means.get(1)) - 5.0).abs() < 1e-4);

        let bad_ids = Tensor::of_slice(&[0i64, 2]);
        ensure!(norm.forward(&input, &bad_ids).is_err());

        Ok(())
    }
}
