use crate::model::CLASS_NAMES;
use anyhow::{ensure, Result};
use burn::{
    data::dataloader::{batcher::Batcher, Dataset},
    prelude::*,
};
use image::{
    imageops::colorops::brighten_in_place, imageops::FilterType, DynamicImage, ImageBuffer, Rgb,
};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use mime_guess::MimeGuess;
use rand::{thread_rng, Rng};
use std::path::{Path, PathBuf};
use std::f32::consts::PI;

pub(crate) const SIZE: usize = 224;
const HALF: i64 = (SIZE / 2) as i64;

/// Largest train-time translation, in pixels.
const MAX_SHIFT: i64 = (SIZE / 5) as i64;

#[derive(Debug, Clone)]
pub(crate) struct ImageData {
    data: Vec<f32>,
    label: usize,
    path: PathBuf,
}

impl ImageData {
    pub(crate) fn data<B: Backend>(&self) -> Tensor<B, 1> {
        Tensor::from_data(&self.data[..], &B::Device::default())
    }

    pub(crate) fn target<B: Backend>(&self) -> Tensor<B, 1, Int> {
        Tensor::from_ints([self.label as i32], &B::Device::default())
    }
}

pub(crate) struct ImageDataSet {
    items: Vec<(PathBuf, usize)>,
    augment: bool,
}

impl ImageDataSet {
    pub(crate) fn train(root: &Path) -> Result<Self> {
        Self::labeled(root, true)
    }

    pub(crate) fn valid(root: &Path) -> Result<Self> {
        Self::labeled(root, false)
    }

    /// Scan a folder-per-class tree, one sub-directory per entry of
    /// [`CLASS_NAMES`]. Every class must contribute at least one image.
    fn labeled(root: &Path, augment: bool) -> Result<Self> {
        let mut items = Vec::new();
        for (label, class) in CLASS_NAMES.iter().enumerate() {
            let dir = root.join(class);
            let before = items.len();
            items.extend(scan_images(&dir).map(|path| (path, label)));
            ensure!(
                items.len() > before,
                "expected images for class {} under {}",
                class,
                dir.display()
            );
        }
        Ok(Self { items, augment })
    }

    pub(crate) fn predict(path: PathBuf) -> Result<Self> {
        let items = scan_images(&path).map(|path| (path, 0)).collect();
        Ok(Self {
            items,
            augment: false,
        })
    }
}

fn scan_images(root: &Path) -> impl Iterator<Item = PathBuf> {
    walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|res| res.ok())
        .filter_map(|e| match MimeGuess::from_path(e.path()).first() {
            Some(mime) if mime.type_() == "image" => Some(e.into_path()),
            _ => None,
        })
}

impl Dataset<ImageData> for ImageDataSet {
    fn get(&self, index: usize) -> Option<ImageData> {
        let (path, label) = self.items.get(index)?;
        let data = match self.augment {
            true => open_image_augment(path),
            false => open_image_normalize(path),
        }
        .unwrap_or_else(|| panic!("Failed to load image {}", path.display()));
        Some(ImageData {
            data,
            label: *label,
            path: path.clone(),
        })
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[derive(Clone)]
pub(crate) struct ImageBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Debug, Clone)]
pub(crate) struct ImageBatch<B: Backend> {
    pub datas: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
    pub paths: Vec<PathBuf>,
}

impl<B: Backend> ImageBatcher<B> {
    pub(crate) fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageData, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageData>) -> ImageBatch<B> {
        let datas = items
            .iter()
            .map(|item| item.data().reshape([1, 3, SIZE, SIZE]))
            .collect::<Vec<_>>();
        let targets = items.iter().map(|item| item.target()).collect::<Vec<_>>();

        let datas = Tensor::cat(datas, 0).to_device(&self.device);
        let targets = Tensor::cat(targets, 0).to_device(&self.device);
        let paths = items.iter().map(|item| item.path.clone()).collect();

        ImageBatch {
            datas,
            targets,
            paths,
        }
    }
}

/// Train-time loading: random flips, zoom, translation, rotation and
/// brightness jitter on top of the canvas placement.
fn open_image_augment(path: impl AsRef<Path>) -> Option<Vec<f32>> {
    let size = SIZE as u32;
    let mut rng = thread_rng();
    let mut img = image::open(path.as_ref().canonicalize().ok()?).ok()?;
    if rng.gen_bool(0.5) {
        img = img.fliph();
    }
    if rng.gen_bool(0.5) {
        img = img.flipv();
    }
    let zoom = rng.gen_range(0.7..1.3);
    let shift = (
        rng.gen_range(-MAX_SHIFT..=MAX_SHIFT),
        rng.gen_range(-MAX_SHIFT..=MAX_SHIFT),
    );
    let img = place_on_canvas(img, zoom, shift)?;
    let theta = rng.gen_range(-1. / 6. ..1. / 6.);
    let buffer = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(size, size, img.to_rgb8().into_raw())?;
    let mut buffer =
        rotate_about_center(&buffer, theta * PI, Interpolation::Nearest, Rgb([0, 0, 0]));
    brighten_in_place(&mut buffer, rng.gen_range(-51..51));
    Some(to_chw(buffer))
}

fn open_image_normalize(path: impl AsRef<Path>) -> Option<Vec<f32>> {
    let img = image::open(path.as_ref().canonicalize().ok()?).ok()?;
    Some(normalize_image(&img))
}

/// Deterministic preprocessing shared by validation, batch prediction and the
/// web app: aspect-preserving resize onto a centered 224x224 canvas, then
/// `/255` normalization in channel-major order.
pub(crate) fn normalize_image(img: &DynamicImage) -> Vec<f32> {
    let img = place_on_canvas(img.clone(), 1.0, (0, 0))
        .expect("canvas placement only fails on zero-sized images");
    to_chw(img.to_rgb8())
}

fn place_on_canvas(img: DynamicImage, zoom: f64, shift: (i64, i64)) -> Option<DynamicImage> {
    let size = SIZE as u32;
    let mut background = image::RgbImage::new(size, size);

    let factor = img.height().max(img.width()) as f64 / (size as f64 * zoom);
    if factor == 0. {
        // an invalid image
        return None;
    }
    let nheight = (img.height() as f64 / factor) as u32;
    let nwidth = (img.width() as f64 / factor) as u32;
    let img = img.resize(nwidth.max(1), nheight.max(1), FilterType::Gaussian);
    image::imageops::overlay(
        &mut background,
        &img.to_rgb8(),
        HALF - (img.width() / 2) as i64 + shift.0,
        HALF - (img.height() / 2) as i64 + shift.1,
    );
    Some(DynamicImage::ImageRgb8(background))
}

fn to_chw(buffer: ImageBuffer<Rgb<u8>, Vec<u8>>) -> Vec<f32> {
    let (width, height) = buffer.dimensions();
    let plane = (width * height) as usize;
    let raw = buffer.into_raw();
    let mut data = vec![0.0; plane * 3];
    for (i, pixel) in raw.chunks_exact(3).enumerate() {
        for (channel, value) in pixel.iter().enumerate() {
            data[channel * plane + i] = *value as f32 / 255.0;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn write_image(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(path).unwrap();
    }

    fn dataset_root(images_per_class: usize) -> TempDir {
        let root = TempDir::new().unwrap();
        for class in CLASS_NAMES {
            let dir = root.path().join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..images_per_class {
                write_image(&dir.join(format!("{i}.png")), 32, 24);
            }
        }
        root
    }

    #[test]
    fn labeled_scan_finds_every_class() {
        let root = dataset_root(2);
        let train = ImageDataSet::train(root.path()).unwrap();
        assert_eq!(train.len(), 2 * CLASS_NAMES.len());
        let valid = ImageDataSet::valid(root.path()).unwrap();
        assert_eq!(valid.len(), 2 * CLASS_NAMES.len());
    }

    #[test]
    fn non_image_files_are_ignored() {
        let root = dataset_root(1);
        std::fs::write(root.path().join("Acne").join("notes.txt"), "not an image").unwrap();
        let train = ImageDataSet::train(root.path()).unwrap();
        assert_eq!(train.len(), CLASS_NAMES.len());
    }

    #[test]
    fn missing_class_directory_is_an_error() {
        let root = dataset_root(1);
        std::fs::remove_dir_all(root.path().join("Vitiligo")).unwrap();
        assert!(ImageDataSet::train(root.path()).is_err());
    }

    #[test]
    fn empty_class_directory_is_an_error() {
        let root = dataset_root(1);
        let dir = root.path().join("Rosacea");
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        assert!(ImageDataSet::valid(root.path()).is_err());
    }

    #[test]
    fn items_carry_labels_in_class_order() {
        let root = dataset_root(1);
        let valid = ImageDataSet::valid(root.path()).unwrap();
        for index in 0..valid.len() {
            let item = valid.get(index).unwrap();
            let class = CLASS_NAMES[item.label];
            assert!(item.path.starts_with(root.path().join(class)));
        }
    }

    #[test]
    fn normalized_pixels_stay_in_unit_range() {
        let root = dataset_root(1);
        let valid = ImageDataSet::valid(root.path()).unwrap();
        let item = valid.get(0).unwrap();
        assert_eq!(item.data.len(), 3 * SIZE * SIZE);
        assert!(item.data.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn augmented_items_keep_the_canvas_shape() {
        let root = dataset_root(1);
        let train = ImageDataSet::train(root.path()).unwrap();
        let item = train.get(0).unwrap();
        assert_eq!(item.data.len(), 3 * SIZE * SIZE);
        assert!(item.data.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn batcher_stacks_images_and_targets() {
        let root = dataset_root(1);
        let valid = ImageDataSet::valid(root.path()).unwrap();
        let items = (0..3).map(|i| valid.get(i).unwrap()).collect::<Vec<_>>();
        let batch: ImageBatch<TestBackend> =
            ImageBatcher::new(Default::default()).batch(items);
        assert_eq!(batch.datas.dims(), [3, 3, SIZE, SIZE]);
        assert_eq!(batch.targets.dims(), [3]);
        assert_eq!(batch.paths.len(), 3);
    }

    #[test]
    fn predict_scan_walks_the_whole_tree() {
        let root = dataset_root(2);
        let predict = ImageDataSet::predict(root.path().to_path_buf()).unwrap();
        assert_eq!(predict.len(), 2 * CLASS_NAMES.len());
    }
}
