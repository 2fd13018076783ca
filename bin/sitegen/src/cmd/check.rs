//! Check command - validate configuration, bundles and templates

use std::path::Path;

use color_eyre::eyre::{Result, bail};
use sitegen_core::{Config, LayoutConfig};
use sitegen_generator::{AssetManifest, AssetPipeline, BundleConfig, Builder, TemplateRenderer};
use walkdir::WalkDir;

/// Validation result.
#[derive(Debug, Default)]
struct ValidationResult {
    errors: Vec<String>,
    checked: usize,
}

impl ValidationResult {
    fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Run the check command.
///
/// Validates the directories, the bundle configuration and every template
/// without writing any output.
pub fn run(config: &Config) -> Result<()> {
    tracing::info!(input = %config.build.input_dir, "Checking configuration and sources");

    let mut result = ValidationResult::default();

    println!("Checking directories...");
    let input = match Builder::from_config(config).resolve_dirs() {
        Ok((input, output)) => {
            println!("  ✓ Input:  {}", input.display());
            println!("  ✓ Output: {}", output.display());
            Some(input)
        }
        Err(e) => {
            println!("  ✗ {e}");
            result.add_error(format!("Directory error: {e}"));
            None
        }
    };

    if let Some(input) = input {
        println!("\nChecking bundles...");
        let manifest = check_bundles(&input, &config.layout, &mut result);

        println!("\nChecking templates...");
        if let Some(manifest) = manifest {
            check_templates(&input, &config.layout, &manifest, &mut result);
        } else {
            println!("  - skipped, bundle configuration is invalid");
        }
    }

    println!();
    println!("Summary:");
    println!("  Templates: {}", result.checked);
    println!("  Errors:    {}", result.errors.len());

    if result.has_errors() {
        println!();
        println!("Errors:");
        for err in &result.errors {
            println!("  ✗ {err}");
        }
        bail!("Validation failed with {} error(s)", result.errors.len());
    }

    println!();
    println!("✓ All checks passed");

    Ok(())
}

/// Validate bundles and return the manifest a build would produce.
fn check_bundles(
    input: &Path,
    layout: &LayoutConfig,
    result: &mut ValidationResult,
) -> Option<AssetManifest> {
    match AssetPipeline::new(layout.clone()).check(input) {
        Ok(0) => println!("  - no bundle configuration"),
        Ok(count) => println!("  ✓ {count} bundle(s) valid"),
        Err(e) => {
            println!("  ✗ {e}");
            result.add_error(format!("Bundle error: {e}"));
            return None;
        }
    }

    let mut manifest = AssetManifest::new();
    if let Ok(Some(bundles)) = BundleConfig::load(input, layout) {
        for (_, bundle) in bundles.bundles() {
            let name = bundle.name.trim();
            manifest.add(name, name);
        }
    }
    Some(manifest)
}

/// Render every template against the expected manifest.
fn check_templates(
    input: &Path,
    layout: &LayoutConfig,
    manifest: &AssetManifest,
    result: &mut ValidationResult,
) {
    let renderer = TemplateRenderer::new(input, manifest);

    let walker = WalkDir::new(input)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry
                .path()
                .strip_prefix(input)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            !layout.is_ignored(&entry.file_name().to_string_lossy()) && !layout.is_reserved(&relative)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                result.add_error(format!("Walk error: {e}"));
                continue;
            }
        };

        if entry.file_type().is_symlink() {
            result.add_error(format!("Symlink is not supported: {}", entry.path().display()));
            continue;
        }
        if !entry.file_type().is_file() || !layout.is_template(entry.path()) {
            continue;
        }

        result.checked += 1;
        match renderer.render(entry.path()) {
            Ok(_) => tracing::debug!(path = %entry.path().display(), "template ok"),
            Err(e) => {
                println!("  ✗ {}", entry.path().display());
                result.add_error(e.to_string());
            }
        }
    }

    if result.checked > 0 {
        println!("  ✓ {} template(s) checked", result.checked);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn config_for(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.build.input_dir = dir.path().join("src").to_string_lossy().into_owned();
        config.build.output_dir = dir.path().join("html").to_string_lossy().into_owned();
        config
    }

    #[test]
    fn test_check_passes_valid_site_without_writing() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        write(
            &src.join("_assets/bundles.json"),
            r#"{"css_bundles": [{"name": "style.css", "inputs": ["_css/a.css"]}]}"#,
        );
        write(&src.join("_css/a.css"), "a");
        write(&src.join("index.html"), r#"{{ asset "style.css" }}{{ render "nav.html" }}"#);
        write(&src.join("nav.html"), "<nav></nav>");

        run(&config_for(&dir)).unwrap();

        assert!(!dir.path().join("html").exists());
    }

    #[test]
    fn test_check_reports_broken_templates() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        write(&src.join("index.html"), r#"{{ asset "missing.css" }}"#);
        write(&src.join("about.html"), "{{ render ");

        let err = run(&config_for(&dir)).unwrap_err();

        assert!(err.to_string().contains("2 error(s)"));
    }

    #[test]
    fn test_check_reports_missing_input() {
        let dir = TempDir::new().unwrap();

        let err = run(&config_for(&dir)).unwrap_err();

        assert!(err.to_string().contains("1 error(s)"));
    }
}
