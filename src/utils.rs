use crate::common::*;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Maps pixel values in `[0, 255]` to `[-1, 1]`.
pub fn normalize(images: &Tensor) -> Tensor {
    images / 127.5 - 1.0
}

/// Maps network outputs in `[-1, 1]` to pixel values in `[0, 255]`.
pub fn denormalize(images: &Tensor) -> Tensor {
    ((images + 1.0) * 127.5).clamp(0.0, 255.0)
}

/// Stacks a `[batch, channel, height, width]` tensor into a single
/// `[channel, batch * height, width]` image, first sample on top.
pub fn merge_batch(images: &Tensor) -> Result<Tensor> {
    let (bsize, channels, height, width) = images.size4()?;
    Ok(images
        .permute(&[1, 0, 2, 3])
        .contiguous()
        .view([channels, bsize * height, width]))
}

/// Joins `[channel, height, width]` images side by side.
pub fn concat_horizontal(images: &[Tensor]) -> Result<Tensor> {
    ensure!(!images.is_empty(), "no image to concatenate");
    let height = images[0].size3()?.1;
    images.iter().try_for_each(|image| -> Result<_> {
        let (_c, h, _w) = image.size3()?;
        ensure!(
            h == height,
            "images to concatenate differ in height: {} vs {}",
            h,
            height
        );
        Ok(())
    })?;
    Ok(Tensor::cat(images, 2))
}

/// Writes a `[channel, height, width]` image with values in `[0, 255]`.
/// The format is chosen by the file extension.
pub fn save_image(image: &Tensor, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let (channels, _h, _w) = image.size3()?;
    ensure!(
        channels == 1 || channels == 3,
        "expect 1 or 3 channels, but get {}",
        channels
    );
    let image = image
        .clamp(0.0, 255.0)
        .round()
        .to_kind(Kind::Uint8)
        .to_device(Device::Cpu);
    vision::image::save(&image, path)
        .with_context(|| format!("unable to save image '{}'", path.display()))?;
    Ok(())
}

/// Loads and resizes an image to `[channels, width, width]` with values in `[0, 255]`.
/// A single channel image is the mean of the color channels.
pub fn load_image(path: impl AsRef<Path>, width: usize, channels: usize) -> Result<Tensor> {
    let path = path.as_ref();
    let width = width as i64;
    let image = vision::image::load_and_resize(path, width, width)
        .with_context(|| format!("unable to load image '{}'", path.display()))?
        .to_kind(Kind::Float);
    let (image_channels, _h, _w) = image.size3()?;

    let image = match (image_channels, channels) {
        (from, to) if from == to as i64 => image,
        (_, 1) => image.mean_dim(&[0], true, Kind::Float),
        (1, 3) => image.repeat(&[3, 1, 1]),
        (from, to) => bail!("unable to convert {} channels to {}", from, to),
    };
    Ok(image)
}

/// Image files directly under `dir`, sorted by path.
pub fn list_images(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let dir_str = dir
        .to_str()
        .ok_or_else(|| format_err!("non-UTF-8 path '{}'", dir.display()))?;
    // the directory part is matched literally
    let pattern = Path::new(&glob::Pattern::escape(dir_str)).join("*");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| format_err!("non-UTF-8 path '{}'", dir.display()))?;

    let paths: Vec<_> = glob::glob(pattern)?
        .map(|entry| entry.map_err(Error::from))
        .filter_ok(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .try_collect::<_, Vec<_>, _>()?
        .into_iter()
        .sorted()
        .collect();

    Ok(paths)
}
