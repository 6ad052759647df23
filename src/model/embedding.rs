use crate::common::*;

pub const EMBEDDING_STDDEV: f64 = 0.01;

/// Check that `ids` is a 1-D int64 tensor of `bsize` elements within `[0, num_styles)`.
pub fn validate_ids(ids: &Tensor, bsize: i64, num_styles: i64) -> Result<()> {
    ensure!(
        ids.kind() == Kind::Int64,
        "style ids must be int64, but get {:?}",
        ids.kind()
    );
    let len = ids.size1()?;
    ensure!(
        len == bsize,
        "expect {} style ids, but get {}",
        bsize,
        len
    );

    if len > 0 {
        let min = i64::from(ids.min());
        let max = i64::from(ids.max());
        ensure!(
            min >= 0 && max < num_styles,
            "style ids must lie in [0, {}), but get range [{}, {}]",
            num_styles,
            min,
            max
        );
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct StyleEmbeddingInit {
    pub num_styles: usize,
    pub embedding_dim: usize,
}

impl StyleEmbeddingInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> StyleEmbedding {
        let path = path.borrow();
        let Self {
            num_styles,
            embedding_dim,
        } = self;

        let table = path.var(
            "table",
            &[num_styles as i64, embedding_dim as i64],
            nn::Init::Randn {
                mean: 0.0,
                stdev: EMBEDDING_STDDEV,
            },
        );

        StyleEmbedding { table }
    }
}

#[derive(Debug)]
pub struct StyleEmbedding {
    table: Tensor,
}

impl StyleEmbedding {
    pub fn embedding_dim(&self) -> i64 {
        self.table.size()[1]
    }

    /// Returns a `[batch, embedding_dim]` tensor with one row per id.
    pub fn lookup(&self, ids: &Tensor) -> Result<Tensor> {
        let num_rows = self.table.size()[0];
        let bsize = ids.size1()?;
        validate_ids(ids, bsize, num_rows)?;
        Ok(self.table.index_select(0, ids))
    }

    pub fn table(&self) -> &Tensor {
        &self.table
    }
}
