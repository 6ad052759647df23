use crate::common::*;

#[derive(Debug, Clone)]
pub struct DatasetInit<P>
where
    P: AsRef<Path>,
{
    pub dir: P,
    pub num_styles: usize,
}

impl<P> DatasetInit<P>
where
    P: AsRef<Path>,
{
    pub async fn load(self) -> Result<StyleDataset> {
        let Self { dir, num_styles } = self;
        let dir = Arc::new(dir.as_ref().to_owned());
        let dataset_file = dir.join("dataset.csv");

        let entries: Vec<DatasetEntry> = csv::Reader::from_path(&dataset_file)
            .with_context(|| format!("unable to open '{}'", dataset_file.display()))?
            .deserialize()
            .try_collect()?;

        ensure!(!entries.is_empty(), "empty dataset is not allowed");
        entries.iter().try_for_each(|entry| -> Result<_> {
            ensure!(
                entry.style_id < num_styles,
                "style id {} of '{}' is out of range [0, {})",
                entry.style_id,
                entry.file.display(),
                num_styles
            );
            Ok(())
        })?;

        let style_counts = entries.iter().map(|entry| entry.style_id).counts();
        info!(
            "{} images, per-style counts {:?}",
            entries.len(),
            style_counts.into_iter().sorted().collect::<Vec<_>>()
        );

        // check file existence
        {
            let dir = dir.clone();
            let paths: Vec<_> = entries.iter().map(|entry| entry.file.clone()).collect();

            stream::iter(paths)
                .map(Fallible::Ok)
                .try_par_for_each(None, move |file| {
                    let path = dir.join(file);
                    async move {
                        ensure!(path.is_file(), "'{}' is not a file", path.display());
                        Ok(())
                    }
                })
                .await?;
        }

        let samples = entries
            .into_iter()
            .map(|DatasetEntry { file, style_id }| (dir.join(file), style_id))
            .collect();

        Ok(StyleDataset { samples })
    }
}

/// Images labeled with style ids, listed by `dataset.csv` under the dataset directory.
#[derive(Debug)]
pub struct StyleDataset {
    samples: Vec<(PathBuf, usize)>,
}

impl StyleDataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Draws `count` samples uniformly with replacement.
    pub fn sample(&self, count: usize) -> Vec<(PathBuf, usize)> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                let index = rng.gen_range(0..self.samples.len());
                self.samples[index].clone()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DatasetEntry {
    pub file: PathBuf,
    pub style_id: usize,
}
