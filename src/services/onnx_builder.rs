// Shared ONNX Runtime session builder with automatic hardware acceleration detection
//
// Both OCR models (text-region detection and line recognition) are built here.

use anyhow::{Context, Result};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{debug, info, warn};

#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

#[cfg(all(target_os = "windows", feature = "directml"))]
use ort::execution_providers::DirectMLExecutionProvider;

/// Calculate thread count for ONNX Runtime CPU inference.
///
/// Windows is capped at 6 threads: more cores add synchronization overhead
/// without throughput.
fn optimal_intra_op_threads() -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, total_cores).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = total_cores.max(1);

    debug!("CPU threads: {} total cores, using {} for inference", total_cores, optimal);
    optimal
}

/// Accelerated providers compiled into this build, in order of preference
fn accelerated_providers() -> Vec<(&'static str, ExecutionProviderDispatch)> {
    #[allow(unused_mut)]
    let mut providers: Vec<(&'static str, ExecutionProviderDispatch)> = Vec::new();

    #[cfg(feature = "tensorrt")]
    providers.push(("TensorRT", TensorRTExecutionProvider::default().build()));

    #[cfg(feature = "cuda")]
    providers.push(("CUDA", CUDAExecutionProvider::default().build()));

    #[cfg(all(target_os = "macos", feature = "coreml"))]
    providers.push(("CoreML", CoreMLExecutionProvider::default().build()));

    #[cfg(all(target_os = "windows", feature = "directml"))]
    providers.push(("DirectML", DirectMLExecutionProvider::default().build()));

    providers
}

fn commit_with(provider: ExecutionProviderDispatch, model_path: &Path) -> ort::Result<Session> {
    Session::builder()?
        .with_execution_providers([provider.error_on_failure()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(optimal_intra_op_threads())?
        .with_inter_threads(1)?
        .commit_from_file(model_path)
}

/// Build an ONNX Runtime session, preferring hardware acceleration.
///
/// Tries every accelerated provider compiled in via Cargo features
/// (TensorRT, CUDA, CoreML, DirectML) and falls back to plain CPU. A provider
/// name in `forced_backend` (e.g. "CUDA", "CPU") skips auto-detection.
///
/// # Returns
/// (backend_name, Session)
pub fn build_session_with_acceleration(
    model_path: &Path,
    model_name: &str,
    forced_backend: Option<&str>,
) -> Result<(String, Session)> {
    if let Some(forced) = forced_backend.filter(|b| !b.eq_ignore_ascii_case("auto")) {
        info!("INFERENCE_BACKEND={}, forcing specific backend for {}", forced, model_name);
        return try_forced_backend(forced, model_path, model_name);
    }

    for (name, provider) in accelerated_providers() {
        match commit_with(provider, model_path) {
            Ok(session) => {
                info!("✓ Using {} acceleration for {}", name, model_name);
                return Ok((name.to_string(), session));
            }
            Err(e) => debug!("{} unavailable for {}: {}", name, model_name, e),
        }
    }

    // Final fallback: Pure CPU (no acceleration)
    let session = commit_with(CPUExecutionProvider::default().build(), model_path).with_context(|| {
        format!(
            "Failed to load {} ONNX model from {}. \
            The file may be corrupt or built with an incompatible ONNX opset",
            model_name,
            model_path.display()
        )
    })?;

    if accelerated_providers().is_empty() {
        info!("Using CPU inference for {}", model_name);
    } else {
        warn!("⚠️  Using CPU-only inference for {} (no GPU acceleration available)", model_name);
    }
    Ok(("CPU".to_string(), session))
}

/// Try to force a specific backend (for testing/debugging)
fn try_forced_backend(backend: &str, model_path: &Path, model_name: &str) -> Result<(String, Session)> {
    if backend.eq_ignore_ascii_case("cpu") {
        let session = commit_with(CPUExecutionProvider::default().build(), model_path)
            .with_context(|| format!("Failed to load {} with CPU", model_name))?;
        info!("✓ Forced CPU backend for {}", model_name);
        return Ok(("CPU".to_string(), session));
    }

    let Some((name, provider)) = accelerated_providers()
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(backend))
    else {
        anyhow::bail!(
            "Inference backend '{}' is not available in this build. \
            Rebuild with the matching feature (cuda, tensorrt, coreml, directml) or use CPU",
            backend
        );
    };

    let session = commit_with(provider, model_path)
        .with_context(|| format!("Failed to load {} with {}", model_name, name))?;
    info!("✓ Forced {} backend for {}", name, model_name);
    Ok((name.to_string(), session))
}
