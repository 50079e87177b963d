//! Haar cascade classifier
//!
//! Loads cascades in OpenCV's XML storage format (`haarcascade_*.xml`) and
//! evaluates them with a sliding, growing window over integral images.
//! Feature responses are normalized by the window's standard deviation, so a
//! cascade trained on 24x24 patches works at any window scale without
//! resampling the image.

use crate::detector::{Region, RegionDetector};
use crate::grouping::{group_rectangles, GROUP_EPS};
use crate::DmsError;
use image::GrayImage;
use imageproc::integral_image::{integral_image, integral_squared_image};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Multi-scale scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Window growth per scale step (must be > 1.0)
    pub scale_factor: f32,
    /// Raw hits a grouped detection needs beyond the first (0 = no grouping)
    pub min_neighbors: u32,
    /// Smallest window side in pixels
    pub min_size: u32,
    /// Largest window side in pixels (unbounded when absent)
    pub max_size: Option<u32>,
}

impl ScanParams {
    pub(crate) fn validate(&self, name: &str) -> Result<(), DmsError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(DmsError::Config(format!(
                "{} scale factor must be greater than 1.0, got {}",
                name, self.scale_factor
            )));
        }
        if let Some(max) = self.max_size {
            if max < self.min_size {
                return Err(DmsError::Config(format!(
                    "{} max size {} is below min size {}",
                    name, max, self.min_size
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct HaarRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<HaarRect>,
}

/// Internal tree node. Child indices <= 0 address leaf `-child`.
#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

/// Boosted Haar cascade
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl HaarCascade {
    /// Load a cascade from an OpenCV XML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DmsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DmsError::ModelLoad(format!("{}: {}", path.display(), e)))?;

        let cascade = Self::from_xml(&text).map_err(|e| match e {
            DmsError::ModelLoad(message) => {
                DmsError::ModelLoad(format!("{}: {}", path.display(), message))
            }
            other => other,
        })?;

        info!(
            "Loaded Haar cascade {} ({} stages, {} features, {}x{} window)",
            path.display(),
            cascade.stages.len(),
            cascade.features.len(),
            cascade.window_width,
            cascade.window_height
        );
        Ok(cascade)
    }

    /// Parse a cascade from OpenCV XML text
    pub fn from_xml(text: &str) -> Result<Self, DmsError> {
        let doc = Document::parse(text).map_err(|e| load_error(format!("invalid XML: {}", e)))?;
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| load_error("missing <cascade> element"))?;

        let feature_type = child_text(root, "featureType")?;
        if !feature_type.trim().eq_ignore_ascii_case("HAAR") {
            return Err(load_error(format!(
                "unsupported feature type {}",
                feature_type.trim()
            )));
        }

        let window_width: u32 = parse_child(root, "width")?;
        let window_height: u32 = parse_child(root, "height")?;
        if window_width == 0 || window_height == 0 {
            return Err(load_error("zero-sized detection window"));
        }

        let features = elements(child(root, "features")?)
            .map(|node| parse_feature(node, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = elements(child(root, "stages")?)
            .map(parse_stage)
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(load_error("cascade has no stages"));
        }

        let cascade = Self {
            window_width,
            window_height,
            stages,
            features,
        };
        cascade.check_references()?;
        Ok(cascade)
    }

    /// Training window size (width, height)
    pub fn window(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    /// Number of boosted stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Every window that passes all stages, before grouping
    pub fn scan(&self, image: &GrayImage, params: &ScanParams) -> Vec<Region> {
        if params.scale_factor.is_nan() || params.scale_factor <= 1.0 {
            warn!("Scale factor {} would never grow the window", params.scale_factor);
            return Vec::new();
        }

        let (image_width, image_height) = image.dimensions();
        if image_width < self.window_width || image_height < self.window_height {
            return Vec::new();
        }

        let tables = IntegralTables::new(image);
        let mut hits = Vec::new();
        let mut scale = 1.0f32;
        let mut previous = (0, 0);

        loop {
            let width = (self.window_width as f32 * scale).round() as u32;
            let height = (self.window_height as f32 * scale).round() as u32;
            scale *= params.scale_factor;

            if width > image_width || height > image_height {
                break;
            }
            if let Some(max) = params.max_size {
                if width > max || height > max {
                    break;
                }
            }
            if (width, height) == previous || width < params.min_size || height < params.min_size
            {
                continue;
            }
            previous = (width, height);

            let window = self.scaled(width, height);
            // Two-pixel stride at base scale, one window-scale stride beyond 2x
            let stride_factor = if window.scale > 2.0 { 1.0 } else { 2.0 };
            let step = (stride_factor * window.scale).round().max(1.0) as usize;

            for y in (0..=image_height - height).step_by(step) {
                for x in (0..=image_width - width).step_by(step) {
                    if self.passes(&window, &tables, x, y) {
                        hits.push(Region::new(x, y, width, height));
                    }
                }
            }
        }

        debug!("Cascade scan produced {} raw hits", hits.len());
        hits
    }

    fn scaled(&self, width: u32, height: u32) -> ScaledWindow {
        let scale = width as f32 / self.window_width as f32;
        let inv_area = 1.0 / (width as f64 * height as f64);

        let features = self
            .features
            .iter()
            .map(|feature| {
                let mut rects: Vec<ScaledRect> = feature
                    .rects
                    .iter()
                    .map(|r| {
                        let x = ((r.x as f32 * scale).round() as u32).min(width);
                        let y = ((r.y as f32 * scale).round() as u32).min(height);
                        ScaledRect {
                            x,
                            y,
                            width: ((r.width as f32 * scale).round() as u32).min(width - x),
                            height: ((r.height as f32 * scale).round() as u32).min(height - y),
                            weight: r.weight as f64 * inv_area,
                        }
                    })
                    .collect();

                // Re-balance the first rectangle so rounding keeps a zero
                // response on flat patches
                if let Some((first, rest)) = rects.split_first_mut() {
                    let first_area = first.area();
                    if first_area > 0.0 {
                        let rest_sum: f64 = rest.iter().map(|r| r.weight * r.area()).sum();
                        first.weight = -rest_sum / first_area;
                    } else {
                        first.weight = 0.0;
                    }
                }
                rects
            })
            .collect();

        ScaledWindow {
            width,
            height,
            scale,
            inv_area,
            features,
        }
    }

    fn passes(&self, window: &ScaledWindow, tables: &IntegralTables, x: u32, y: u32) -> bool {
        let sum = tables.sum(x, y, window.width, window.height) as f64;
        let squared = tables.squared_sum(x, y, window.width, window.height) as f64;
        let mean = sum * window.inv_area;
        let variance = squared * window.inv_area - mean * mean;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut total = 0.0f32;
            for classifier in &stage.classifiers {
                let mut index = 0usize;
                let leaf = loop {
                    let node = classifier.nodes[index];
                    let value = window.feature_value(node.feature, tables, x, y);
                    let next = if value < node.threshold as f64 * norm {
                        node.left
                    } else {
                        node.right
                    };
                    if next <= 0 {
                        break next.unsigned_abs() as usize;
                    }
                    index = next as usize;
                };
                total += classifier.leaves[leaf];
            }
            if total < stage.threshold {
                return false;
            }
        }
        true
    }

    fn check_references(&self) -> Result<(), DmsError> {
        for (s, stage) in self.stages.iter().enumerate() {
            for classifier in &stage.classifiers {
                for (i, node) in classifier.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(load_error(format!(
                            "stage {} references missing feature {}",
                            s, node.feature
                        )));
                    }
                    for child in [node.left, node.right] {
                        let valid = if child > 0 {
                            // Children always point forward, so evaluation terminates
                            (child as usize) > i && (child as usize) < classifier.nodes.len()
                        } else {
                            (child.unsigned_abs() as usize) < classifier.leaves.len()
                        };
                        if !valid {
                            return Err(load_error(format!(
                                "stage {} has invalid tree child {}",
                                s, child
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl RegionDetector for HaarCascade {
    fn detect_regions(&self, image: &GrayImage, params: &ScanParams) -> Vec<Region> {
        let hits = self.scan(image, params);
        group_rectangles(&hits, params.min_neighbors, GROUP_EPS)
    }
}

#[derive(Debug, Clone, Copy)]
struct ScaledRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

impl ScaledRect {
    fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

/// Cascade features resized to one window scale
struct ScaledWindow {
    width: u32,
    height: u32,
    scale: f32,
    inv_area: f64,
    features: Vec<Vec<ScaledRect>>,
}

impl ScaledWindow {
    fn feature_value(&self, feature: usize, tables: &IntegralTables, x: u32, y: u32) -> f64 {
        self.features[feature]
            .iter()
            .map(|r| r.weight * tables.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

/// Zero-padded summed-area tables for pixel values and their squares
struct IntegralTables {
    stride: usize,
    sum: Vec<u64>,
    squared: Vec<u64>,
}

impl IntegralTables {
    fn new(image: &GrayImage) -> Self {
        let sum = integral_image::<_, u64>(image);
        let squared = integral_squared_image::<_, u64>(image);
        debug_assert_eq!(sum.width(), image.width() + 1);

        Self {
            stride: sum.width() as usize,
            sum: sum.into_raw(),
            squared: squared.into_raw(),
        }
    }

    fn sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, width, height)
    }

    fn squared_sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        Self::rect(&self.squared, self.stride, x, y, width, height)
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, width: u32, height: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0]
    }
}

fn load_error(message: impl Into<String>) -> DmsError {
    DmsError::ModelLoad(message.into())
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, DmsError> {
    elements(node)
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| load_error(format!("missing <{}> element", name)))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, DmsError> {
    Ok(child(node, name)?.text().unwrap_or(""))
}

fn parse_child<T: FromStr>(node: Node<'_, '_>, name: &str) -> Result<T, DmsError> {
    let text = child_text(node, name)?;
    text.trim()
        .parse()
        .map_err(|_| load_error(format!("<{}> is not a number: {:?}", name, text.trim())))
}

fn parse_numbers<T: FromStr>(text: &str, what: &str) -> Result<Vec<T>, DmsError> {
    text.split_whitespace()
        .map(|token| {
            token
                .parse()
                .map_err(|_| load_error(format!("bad number {:?} in {}", token, what)))
        })
        .collect()
}

fn parse_feature(
    node: Node<'_, '_>,
    window_width: u32,
    window_height: u32,
) -> Result<HaarFeature, DmsError> {
    if let Ok(tilted) = child_text(node, "tilted") {
        if tilted.trim() != "0" {
            return Err(load_error("tilted Haar features are not supported"));
        }
    }

    let rects = elements(child(node, "rects")?)
        .map(|rect| {
            let values: Vec<f32> = parse_numbers(rect.text().unwrap_or(""), "rects")?;
            if values.len() != 5 || values[..4].iter().any(|v| *v < 0.0) {
                return Err(load_error(format!("malformed feature rectangle {:?}", values)));
            }
            let rect = HaarRect {
                x: values[0] as u32,
                y: values[1] as u32,
                width: values[2] as u32,
                height: values[3] as u32,
                weight: values[4],
            };
            if rect.x + rect.width > window_width || rect.y + rect.height > window_height {
                return Err(load_error("feature rectangle outside the detection window"));
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() {
        return Err(load_error("feature without rectangles"));
    }
    Ok(HaarFeature { rects })
}

fn parse_stage(node: Node<'_, '_>) -> Result<Stage, DmsError> {
    let threshold: f32 = parse_child(node, "stageThreshold")?;

    let classifiers = elements(child(node, "weakClassifiers")?)
        .map(|weak| {
            let raw: Vec<f64> = parse_numbers(child_text(weak, "internalNodes")?, "internalNodes")?;
            if raw.is_empty() || raw.len() % 4 != 0 {
                return Err(load_error("internalNodes must hold groups of four values"));
            }
            let nodes = raw
                .chunks_exact(4)
                .map(|n| TreeNode {
                    left: n[0] as i32,
                    right: n[1] as i32,
                    feature: n[2] as usize,
                    threshold: n[3] as f32,
                })
                .collect();
            let leaves = parse_numbers(child_text(weak, "leafValues")?, "leafValues")?;
            Ok(WeakClassifier { nodes, leaves })
        })
        .collect::<Result<Vec<_>, DmsError>>()?;

    Ok(Stage {
        threshold,
        classifiers,
    })
}
