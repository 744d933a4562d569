//! Dependency ordering
//!
//! A layer depends on the layer named by a `built` base and on every
//! layer it imports from with `strata://`. Layers are built so that each
//! one comes after its dependencies; independent layers keep file order.

use crate::error::{StrataError, StrataResult};
use crate::import::ImportSource;
use crate::layer::manifest::{LayerBase, LayerDeclaration, Stackfile};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Layers the given declaration must be built after.
///
/// `strata://` imports naming a layer outside the stackfile are not
/// dependencies; they read whatever tree already exists under the roots
/// directory.
pub fn dependencies(decl: &LayerDeclaration, stack: &Stackfile) -> StrataResult<Vec<String>> {
    let mut deps: Vec<String> = Vec::new();

    if let LayerBase::Built(tag) = &decl.from {
        if stack.get(tag).is_none() {
            return Err(StrataError::UnknownDependency {
                layer: decl.name.clone(),
                dependency: tag.clone(),
            });
        }
        deps.push(tag.clone());
    }

    for spec in &decl.import {
        // Malformed imports surface when the layer is imported
        let Ok(source) = ImportSource::parse(spec) else {
            continue;
        };
        if let Some(layer) = source.layer_dependency() {
            if stack.get(layer).is_some() && !deps.iter().any(|d| d == layer) {
                deps.push(layer.to_string());
            }
        }
    }

    Ok(deps)
}

/// Order the stackfile's layers so every layer follows its dependencies
pub fn dependency_order(stack: &Stackfile) -> StrataResult<Vec<&LayerDeclaration>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut order = Vec::with_capacity(stack.layers.len());
    let mut path = Vec::new();

    for decl in &stack.layers {
        visit(decl, stack, &mut marks, &mut path, &mut order)?;
    }

    debug!(
        "Build order: {}",
        order.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
    );
    Ok(order)
}

fn visit<'a>(
    decl: &'a LayerDeclaration,
    stack: &'a Stackfile,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<&'a LayerDeclaration>,
) -> StrataResult<()> {
    match marks.get(decl.name.as_str()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|n| *n == decl.name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(decl.name.clone());
            return Err(StrataError::DependencyCycle(cycle));
        }
        None => {}
    }

    marks.insert(&decl.name, Mark::Visiting);
    path.push(&decl.name);

    for dep in dependencies(decl, stack)? {
        if let Some(dep_decl) = stack.get(&dep) {
            visit(dep_decl, stack, marks, path, order)?;
        }
    }

    path.pop();
    marks.insert(&decl.name, Mark::Done);
    order.push(decl);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn stack(content: &str) -> Stackfile {
        Stackfile::parse(content, Path::new("strata.yaml"), &[]).unwrap()
    }

    fn names(order: &[&LayerDeclaration]) -> Vec<String> {
        order.iter().map(|d| d.name.clone()).collect()
    }

    #[test]
    fn independent_layers_keep_file_order() {
        let s = stack(
            "a:\n  from: {type: scratch}\nb:\n  from: {type: scratch}\nc:\n  from: {type: scratch}\n",
        );
        assert_eq!(names(&dependency_order(&s).unwrap()), ["a", "b", "c"]);
    }

    #[test]
    fn built_base_comes_first() {
        let s = stack(
            "app:\n  from: {type: built, tag: base}\nbase:\n  from: {type: scratch}\n",
        );
        assert_eq!(names(&dependency_order(&s).unwrap()), ["base", "app"]);
    }

    #[test]
    fn layer_imports_are_dependencies() {
        let s = stack(concat!(
            "app:\n  from: {type: scratch}\n  import: strata://tools/usr/bin/tool\n",
            "tools:\n  from: {type: scratch}\n",
        ));
        assert_eq!(names(&dependency_order(&s).unwrap()), ["tools", "app"]);
    }

    #[test]
    fn imports_from_outside_layers_are_ignored() {
        let s = stack("app:\n  from: {type: scratch}\n  import: strata://elsewhere/x\n");
        assert_eq!(names(&dependency_order(&s).unwrap()), ["app"]);
    }

    #[test]
    fn unknown_built_tag_is_an_error() {
        let s = stack("app:\n  from: {type: built, tag: missing}\n");
        let err = dependency_order(&s).unwrap_err();
        assert!(matches!(err, StrataError::UnknownDependency { dependency, .. } if dependency == "missing"));
    }

    #[test]
    fn cycles_are_reported() {
        let s = stack(concat!(
            "a:\n  from: {type: built, tag: b}\n",
            "b:\n  from: {type: scratch}\n  import: strata://a/file\n",
        ));
        match dependency_order(&s).unwrap_err() {
            StrataError::DependencyCycle(cycle) => assert_eq!(cycle, ["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
