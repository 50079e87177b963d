//! Clustering of raw cascade hits into detections

use crate::detector::Region;

/// Relative tolerance for two hits to count as the same object
pub const GROUP_EPS: f32 = 0.2;

/// Merge overlapping hits and keep clusters with more than `min_neighbors`
/// members.
///
/// Clusters are averaged into one rectangle. A surviving cluster that sits
/// inside a clearly stronger one is dropped as well. With `min_neighbors == 0`
/// the raw hits are returned unchanged.
pub fn group_rectangles(rects: &[Region], min_neighbors: u32, eps: f32) -> Vec<Region> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let labels = partition(rects, eps);

    let mut sums: Vec<[u64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    let mut class_of_label = vec![usize::MAX; rects.len()];

    for (rect, &label) in rects.iter().zip(&labels) {
        if class_of_label[label] == usize::MAX {
            class_of_label[label] = sums.len();
            sums.push([0; 4]);
            counts.push(0);
        }
        let class = class_of_label[label];
        sums[class][0] += rect.x as u64;
        sums[class][1] += rect.y as u64;
        sums[class][2] += rect.width as u64;
        sums[class][3] += rect.height as u64;
        counts[class] += 1;
    }

    let clusters: Vec<(Region, u32)> = sums
        .iter()
        .zip(&counts)
        .filter(|(_, n)| **n > min_neighbors)
        .map(|(sum, &n)| {
            let avg = |v: u64| (v as f32 / n as f32).round() as u32;
            (Region::new(avg(sum[0]), avg(sum[1]), avg(sum[2]), avg(sum[3])), n)
        })
        .collect();

    clusters
        .iter()
        .enumerate()
        .filter(|(i, (inner, inner_count))| {
            !clusters.iter().enumerate().any(|(j, (outer, outer_count))| {
                *i != j
                    && (*outer_count > (*inner_count).max(3) || *inner_count < 3)
                    && nested(inner, outer, eps)
            })
        })
        .map(|(_, (region, _))| *region)
        .collect()
}

fn similar(a: &Region, b: &Region, eps: f32) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;

    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.right(), b.right())
        && close(a.bottom(), b.bottom())
}

fn nested(inner: &Region, outer: &Region, eps: f32) -> bool {
    let dx = (outer.width as f32 * eps).round() as i64;
    let dy = (outer.height as f32 * eps).round() as i64;

    inner.x as i64 >= outer.x as i64 - dx
        && inner.y as i64 >= outer.y as i64 - dy
        && inner.right() as i64 <= outer.right() as i64 + dx
        && inner.bottom() as i64 <= outer.bottom() as i64 + dy
}

/// Union-find equivalence classes under `similar`; returns a root per rect
fn partition(rects: &[Region], eps: f32) -> Vec<usize> {
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut parent: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    (0..rects.len()).map(|i| find(&mut parent, i)).collect()
}
