use super::{
    decoder::{Decoder, DecoderInit},
    embedding::{StyleEmbedding, StyleEmbeddingInit},
    encoder::{Encoder, EncoderInit, EncoderOutput},
    misc::NormKind,
};
use crate::common::*;

#[derive(Debug, Clone)]
pub struct GeneratorInit {
    pub input_channels: usize,
    pub output_channels: usize,
    pub generator_dim: usize,
    pub embedding_num: usize,
    pub embedding_dim: usize,
    pub norm_kind: NormKind,
}

impl GeneratorInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Generator> {
        let path = path.borrow();
        let Self {
            input_channels,
            output_channels,
            generator_dim,
            embedding_num,
            embedding_dim,
            norm_kind,
        } = self;
        ensure!(embedding_num > 0, "embedding_num must be positive");

        let encoder = EncoderInit {
            input_channels,
            base_channels: generator_dim,
        }
        .build(path / "encoder")?;

        let embedding = StyleEmbeddingInit {
            num_styles: embedding_num,
            embedding_dim,
        }
        .build(path / "embedding");

        let skip_channels = encoder.channels().to_vec();
        let bottleneck_channels = skip_channels
            .last()
            .ok_or_else(|| format_err!("encoder has no stage"))?
            + embedding_dim;

        let decoder = DecoderInit {
            input_channels: bottleneck_channels,
            output_channels,
            base_channels: generator_dim,
            skip_channels,
            norm_kind,
            num_styles: embedding_num,
        }
        .build(path / "decoder")?;

        Ok(Generator {
            encoder,
            decoder,
            embedding,
        })
    }
}

#[derive(Debug)]
pub struct GeneratorOutput {
    pub output: Tensor,
    /// Bottleneck feature of the input image, before style injection.
    pub encoded: Tensor,
}

/// Encoder-decoder generator conditioned on a per-style embedding.
#[derive(Debug)]
pub struct Generator {
    encoder: Encoder,
    decoder: Decoder,
    embedding: StyleEmbedding,
}

impl Generator {
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn embedding(&self) -> &StyleEmbedding {
        &self.embedding
    }

    pub fn forward_t(
        &mut self,
        input: &Tensor,
        style_ids: &Tensor,
        train: bool,
    ) -> Result<GeneratorOutput> {
        let Self {
            ref mut encoder,
            ref mut decoder,
            ref embedding,
        } = *self;

        let EncoderOutput { encoded, features } = encoder.forward_t(input, train)?;
        let (bsize, _c, height, width) = encoded.size4()?;
        ensure!(
            style_ids.size1()? == bsize,
            "expect {} style ids, but get {}",
            bsize,
            style_ids.size1()?
        );

        let style = {
            let dim = embedding.embedding_dim();
            embedding
                .lookup(style_ids)?
                .view([bsize, dim, 1, 1])
                .expand(&[bsize, dim, height, width], false)
        };
        let bottleneck = Tensor::cat(&[&encoded, &style], 1);
        let output = decoder.forward_t(&bottleneck, &features, style_ids, train)?;

        Ok(GeneratorOutput { output, encoded })
    }

    /// Bottleneck feature only, used to re-encode generated images.
    pub fn encode(&mut self, input: &Tensor, train: bool) -> Result<Tensor> {
        let EncoderOutput { encoded, .. } = self.encoder.forward_t(input, train)?;
        Ok(encoded)
    }

    /// Shallow handles to the parameters selected by style id: the embedding
    /// table followed by the scale and shift tables of conditional instance norms.
    pub fn style_params(&self) -> Vec<Tensor> {
        iter::once(self.embedding.table().shallow_clone())
            .chain(self.decoder.style_params())
            .collect()
    }
}
