//! CPU backend: row-interleaved fan-out over the rayon pool.

use bytemuck::Pod;

use super::{emit_pixel, march_pixel, EntryPoint, ImageData, Launch, PassDesc, Shader, ShadingPass, ShadingStatus};

/// CPU entry point for shader `S`.
pub fn cpu_entry<S: Shader>() -> EntryPoint {
    cpu_shade::<S>
}

fn cpu_shade<S: Shader>(desc: &mut PassDesc<'_>, constants: &[u8]) -> ShadingStatus {
    let Ok(shader) = bytemuck::try_pod_read_unaligned::<S>(constants) else {
        tracing::warn!(
            got = constants.len(),
            expected = std::mem::size_of::<S>(),
            "cpu: constant block size mismatch"
        );
        return ShadingStatus::Err;
    };
    let nthreads = match &desc.launch {
        Launch::Cpu(launch) => launch.nthreads,
        Launch::Gpu(_) => return ShadingStatus::Err,
    };
    if desc.image.pixel_size != std::mem::size_of::<S::Pixel>() {
        tracing::warn!(pixel_size = desc.image.pixel_size, "cpu: pixel layout mismatch");
        return ShadingStatus::Err;
    }

    let pass = desc.pass;
    let view = desc.view;
    let resolution = desc.image.resolution;
    let count = desc.image.pixel_count();
    let ImageData::Host(bytes) = &mut desc.image.data else {
        return ShadingStatus::Err;
    };
    let Ok(pixels) = bytemuck::try_cast_slice_mut::<u8, S::Pixel>(bytes) else {
        return ShadingStatus::Err;
    };
    if pixels.len() != count {
        return ShadingStatus::Err;
    }

    let width = resolution.x as usize;
    match pass {
        ShadingPass::RayEmit => {
            let Some(view) = view else {
                return ShadingStatus::Err;
            };
            dispatch_rows(pixels, width, nthreads, |x, y, px| {
                emit_pixel(&shader, view.ray(x, y, resolution), px);
            });
        }
        ShadingPass::RayMarch => {
            dispatch_rows(pixels, width, nthreads, |_, _, px| march_pixel(&shader, px));
        }
    }
    ShadingStatus::Ok
}

/// Run `f` over every pixel, splitting rows across `nthreads` workers.
///
/// Worker `t` owns rows `t, t + nthreads, t + 2 * nthreads, ...`, so rows of
/// uneven cost spread evenly. Returns once every worker has finished.
pub fn dispatch_rows<P, F>(pixels: &mut [P], width: usize, nthreads: usize, f: F)
where
    P: Pod + Send,
    F: Fn(u32, u32, &mut P) + Sync,
{
    if width == 0 || pixels.is_empty() {
        return;
    }
    let nthreads = nthreads.max(1);

    let mut buckets: Vec<Vec<(usize, &mut [P])>> = (0..nthreads).map(|_| Vec::new()).collect();
    for (y, row) in pixels.chunks_mut(width).enumerate() {
        buckets[y % nthreads].push((y, row));
    }

    let f = &f;
    rayon::scope(|s| {
        for bucket in buckets.into_iter().filter(|b| !b.is_empty()) {
            s.spawn(move |_| {
                for (y, row) in bucket {
                    for (x, px) in row.iter_mut().enumerate() {
                        f(x as u32, y as u32, px);
                    }
                }
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pixel_visited_once() {
        let (w, h) = (7usize, 13usize);
        let mut px = vec![0u32; w * h];
        dispatch_rows(&mut px, w, 4, |x, y, p| *p += 1 + x + y * 100);
        for y in 0..h {
            for x in 0..w {
                assert_eq!(px[y * w + x], 1 + x as u32 + y as u32 * 100);
            }
        }
    }

    #[test]
    fn test_more_threads_than_rows() {
        let mut px = vec![0u32; 6];
        dispatch_rows(&mut px, 3, 16, |_, _, p| *p += 1);
        assert!(px.iter().all(|&p| p == 1));
    }

    #[test]
    fn test_empty_image() {
        let mut px: Vec<u32> = Vec::new();
        dispatch_rows(&mut px, 0, 4, |_, _, p| *p += 1);
        assert!(px.is_empty());
    }
}
