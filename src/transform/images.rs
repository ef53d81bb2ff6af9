use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;
use camino::Utf8Path;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::core::Hash32;
use crate::output::Output;
use crate::resource::Input;
use crate::transform::{Context, Transform};

const DIR_CACHE: &str = "images";

/// Tells apart temporary cache files written at the same time.
static TEMP_ID: AtomicUsize = AtomicUsize::new(0);

/// Recompresses raster images.
///
/// PNG files are re-encoded losslessly with the best compression level. JPEG
/// files are decoded and re-encoded at quality 100, which is close to but not
/// exactly the original. Whichever of the original and the re-encoded file is smaller
/// wins, so an image never grows. Other formats pass through untouched.
///
/// Results are cached by source content inside the environment's cache
/// directory, so unchanged images are only processed once.
#[derive(Debug, Default, Clone)]
pub struct Images;

impl Transform for Images {
    fn describe(&self) -> &'static str {
        "image"
    }

    fn transform(&self, ctx: &Context<'_>, inputs: &[Input]) -> anyhow::Result<Vec<Output>> {
        let cache = ctx.env.cache_dir().join(DIR_CACHE);
        fs::create_dir_all(&cache).with_context(|| format!("Couldn't create '{cache}'"))?;

        inputs
            .par_iter()
            .map(|input| -> anyhow::Result<Output> {
                let data = process(&cache, &input.path)?;
                Ok(Output::binary(&input.rel, data))
            })
            .collect()
    }
}

fn process(cache: &Utf8Path, path: &Utf8Path) -> anyhow::Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("Couldn't read '{path}'"))?;
    let ext = path.extension().unwrap_or_default().to_ascii_lowercase();

    let cached = cache.join(format!("{}.{ext}", Hash32::hash(&bytes).to_hex()));

    // FAST PATH
    if cached.is_file() {
        return Ok(fs::read(&cached)?);
    }

    // SLOW PATH
    let data = optimize(&bytes, &ext).with_context(|| format!("Couldn't optimize '{path}'"))?;

    // Identical images may be processed in parallel, readers only ever see a
    // complete cache file.
    let id = TEMP_ID.fetch_add(1, Ordering::Relaxed);
    let temp = cached.with_extension(format!("{ext}.{}-{id}.tmp", std::process::id()));
    fs::write(&temp, &data).with_context(|| format!("Couldn't write '{temp}'"))?;
    fs::rename(&temp, &cached).with_context(|| format!("Couldn't write '{cached}'"))?;

    Ok(data)
}

#[cfg(feature = "image")]
fn optimize(bytes: &[u8], ext: &str) -> anyhow::Result<Vec<u8>> {
    use image::codecs::jpeg::JpegEncoder;
    use image::codecs::png::{CompressionType, FilterType, PngEncoder};
    use image::{ExtendedColorType, ImageEncoder, ImageFormat};

    let encoded = match ext {
        "png" => {
            let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
            let mut out = Vec::new();
            PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
                .write_image(img.as_bytes(), img.width(), img.height(), img.color().into())?;
            out
        }
        "jpg" | "jpeg" => {
            let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
            let rgb = img.to_rgb8();
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, 100).write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )?;
            out
        }
        _ => return Ok(bytes.to_vec()),
    };

    if encoded.len() < bytes.len() {
        Ok(encoded)
    } else {
        Ok(bytes.to_vec())
    }
}

#[cfg(not(feature = "image"))]
fn optimize(bytes: &[u8], _: &str) -> anyhow::Result<Vec<u8>> {
    Ok(bytes.to_vec())
}
