use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use tracing::debug;
use uuid::Uuid;

use crate::data::{DataType, Value};
use crate::node::{Arity, ComputeArgs, NodeClass, NodeLambda, NullData, Stage};
use crate::param::{ParamDef, ParamDomain};
use crate::registry::NodeModule;

pub const GROUP: &str = "Utils";

pub fn module() -> NodeModule {
    NodeModule::new(GROUP)
        .with(file_in())
        .with(file_out())
        .with(switch())
}

// The artifact is keyed on the path, so a file changed in place keeps
// serving the cached contents until the cache entry is evicted.
fn file_in() -> NodeClass {
    NodeClass {
        name: "FileIn".to_string(),
        description: Some("Reads a file from disk".to_string()),
        stage: Stage::Input,
        arity: Arity::Exact(0),
        output_type: DataType::Image,
        params: vec![ParamDef::new(
            "path",
            "",
            ParamDomain::Path { must_exist: true },
        )],
        null_data: NullData::Value(Value::Null),
        lambda: NodeLambda::new(|args: &ComputeArgs<'_>| {
            let path = args
                .params
                .get_str("path")
                .ok_or_else(|| anyhow!("missing parameter \"path\""))?;
            let bytes = fs::read(path).with_context(|| format!("failed to read {}", path))?;
            Ok(Value::Bytes(bytes))
        }),
        ..Default::default()
    }
}

fn file_out() -> NodeClass {
    NodeClass {
        name: "FileOut".to_string(),
        description: Some("Writes its input to a file and yields the path".to_string()),
        stage: Stage::Output,
        arity: Arity::Exact(1),
        input_types: vec![DataType::Any],
        output_type: DataType::Path,
        params: vec![
            ParamDef::new("path", "", ParamDomain::Path { must_exist: false }),
            ParamDef::new("create_dir", false, ParamDomain::Bool),
        ],
        cacheable: false,
        lambda: NodeLambda::new(|args: &ComputeArgs<'_>| {
            let path = args
                .params
                .get_str("path")
                .ok_or_else(|| anyhow!("missing parameter \"path\""))?;
            let bytes = args.inputs[0].to_file_bytes()?;
            write_if_changed(Path::new(path), &bytes, args.params.get_bool("create_dir"))?;
            Ok(Value::String(path.to_string()))
        }),
        ..Default::default()
    }
}

fn switch() -> NodeClass {
    NodeClass {
        name: "Switch".to_string(),
        description: Some("Passes through one of two inputs".to_string()),
        stage: Stage::Utils,
        arity: Arity::Exact(2),
        input_types: vec![DataType::Any, DataType::Any],
        output_type: DataType::Any,
        params: vec![ParamDef::new(
            "input",
            0,
            ParamDomain::IntRange { min: 0, max: 1 },
        )],
        lambda: NodeLambda::new(|args: &ComputeArgs<'_>| {
            let selected = args.params.get_int("input").unwrap_or_default();
            let input = usize::try_from(selected)
                .ok()
                .and_then(|idx| args.inputs.get(idx))
                .ok_or_else(|| anyhow!("no input {}", selected))?;
            Ok(input.as_ref().clone())
        }),
        ..Default::default()
    }
}

/// Writes through a temporary file and rename. Skips the write when the
/// file already holds exactly `bytes`.
fn write_if_changed(path: &Path, bytes: &[u8], create_dir: Option<bool>) -> anyhow::Result<()> {
    if fs::read(path).is_ok_and(|existing| existing == bytes) {
        debug!("{:?} is up to date", path);
        return Ok(());
    }

    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = parent {
        if create_dir.unwrap_or(false) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} is not a file path", path.display()))?;
    let temp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4()
    ));
    fs::write(&temp_path, bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err).with_context(|| format!("failed to write {}", path.display()));
    }

    debug!("Wrote {} bytes to {:?}", bytes.len(), path);

    Ok(())
}

#[cfg(test)]
mod tests {
    use common::test_utils::unique_test_dir;

    use super::*;

    #[test]
    fn write_if_changed_creates_and_skips() -> anyhow::Result<()> {
        let dir = unique_test_dir("write_if_changed");
        let path = dir.join("nested").join("out.txt");

        assert!(write_if_changed(&path, b"hello", Some(false)).is_err());

        write_if_changed(&path, b"hello", Some(true))?;
        assert_eq!(fs::read(&path)?, b"hello");
        let modified = fs::metadata(&path)?.modified()?;

        write_if_changed(&path, b"hello", Some(true))?;
        assert_eq!(fs::metadata(&path)?.modified()?, modified);

        write_if_changed(&path, b"bye", Some(true))?;
        assert_eq!(fs::read(&path)?, b"bye");

        let leftovers = fs::read_dir(path.parent().expect("has parent"))?.count();
        assert_eq!(leftovers, 1);

        Ok(())
    }
}
