//! `navecd init` - create a project skeleton

use std::path::Path;

use super::CommandResult;

const MODULE_TEMPLATE: &str = r#"module: "{module}"
language: {
	version: "v0.9.2"
}
"#;

const PROJECT_TEMPLATE: &str = r#"package {package}

import (
	"github.com/kharf/navecd/schema/component"
)

ns: component.#Manifest & {
	content: {
		apiVersion: "v1"
		kind:       "Namespace"
		metadata: name: "{package}"
	}
}
"#;

pub fn run(module: &str, output: &Path) -> CommandResult {
    let package = module
        .rsplit('/')
        .next()
        .unwrap_or(module)
        .replace(['.', '-'], "");

    let module_dir = output.join("cue.mod");
    std::fs::create_dir_all(&module_dir)?;
    std::fs::write(
        module_dir.join("module.cue"),
        MODULE_TEMPLATE.replace("{module}", module),
    )?;

    let project_file = output.join(format!("{package}.cue"));
    if !project_file.exists() {
        std::fs::write(
            &project_file,
            PROJECT_TEMPLATE.replace("{package}", &package),
        )?;
    }

    println!("Initialized project module {module}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_skeleton() {
        let temp = TempDir::new().unwrap();
        run("github.com/org/infra", temp.path()).unwrap();

        let module = std::fs::read_to_string(temp.path().join("cue.mod").join("module.cue")).unwrap();
        assert!(module.contains("github.com/org/infra"));
        assert!(temp.path().join("infra.cue").exists());
    }

    #[test]
    fn test_init_keeps_existing_project_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("infra.cue"), "package infra\n").unwrap();

        run("github.com/org/infra", temp.path()).unwrap();

        let contents = std::fs::read_to_string(temp.path().join("infra.cue")).unwrap();
        assert_eq!(contents, "package infra\n");
    }
}
