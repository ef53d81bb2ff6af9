use crate::output::Output;
use crate::resource::Input;
use crate::transform::{Context, Transform};

/// Byte-identical passthrough, mirroring each file's path relative to its
/// source base.
#[derive(Debug, Default, Clone)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn describe(&self) -> &'static str {
        "copy"
    }

    fn transform(&self, _: &Context<'_>, inputs: &[Input]) -> anyhow::Result<Vec<Output>> {
        Ok(inputs
            .iter()
            .map(|input| Output::copy(&input.rel, &input.path))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8Path;

    use super::*;
    use crate::output::OutputData;
    use crate::transform::testing;

    #[test]
    fn test_copy_mirrors_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        fs::create_dir_all(root.join("src/scripts/vendor/swiper")).unwrap();
        fs::write(root.join("src/scripts/vendor/swiper/swiper.js"), "swiper").unwrap();
        fs::write(root.join("src/scripts/vendor/jquery.js"), "jquery").unwrap();

        let env = testing::env(root);
        let category = testing::category("vendor", "src/scripts/vendor/**/*.js", "scripts");
        let outputs = testing::run(&Passthrough, &env, &category).unwrap();

        assert_eq!(
            outputs,
            vec![
                Output::copy("jquery.js", root.join("src/scripts/vendor/jquery.js")),
                Output::copy("swiper/swiper.js", root.join("src/scripts/vendor/swiper/swiper.js")),
            ]
        );
        assert!(matches!(outputs[0].data, OutputData::Copy(_)));
    }
}
