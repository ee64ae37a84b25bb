// Call-site arity and keyword checks against a stored parameter list

use crate::analyzer::CallArguments;
use crate::indexer::model::{Parameter, ParameterKind};

/// Check a call against a parameter list. `bound_receiver` drops the leading
/// `self`/`cls` parameter. Returns the mismatch description, if any.
pub fn check_call(parameters: &[Parameter], bound_receiver: bool, arguments: &CallArguments) -> Option<String> {
    if arguments.has_splat {
        return None;
    }

    let parameters = if bound_receiver && parameters.first().is_some_and(Parameter::is_positional) {
        &parameters[1..]
    } else {
        parameters
    };

    let positional: Vec<&Parameter> = parameters.iter().filter(|p| p.is_positional()).collect();
    let accepts_var_positional = parameters.iter().any(|p| p.kind == ParameterKind::VarPositional);
    let accepts_var_keyword = parameters.iter().any(|p| p.kind == ParameterKind::VarKeyword);

    if arguments.positional > positional.len() && !accepts_var_positional {
        return Some(format!(
            "takes at most {} positional argument{} but {} {} given",
            positional.len(),
            plural(positional.len()),
            arguments.positional,
            if arguments.positional == 1 { "was" } else { "were" }
        ));
    }

    let mut bound: Vec<&str> = positional
        .iter()
        .take(arguments.positional)
        .map(|p| p.name.as_str())
        .collect();

    for keyword in &arguments.keywords {
        let target = parameters.iter().find(|p| p.name == *keyword && p.accepts_keyword());
        match target {
            Some(parameter) => {
                if bound.contains(&parameter.name.as_str()) {
                    return Some(format!("got multiple values for argument `{}`", keyword));
                }
                bound.push(parameter.name.as_str());
            }
            // Collected by `**kwargs`, even when it names a positional-only parameter
            None if accepts_var_keyword => {}
            None if parameters.iter().any(|p| p.name == *keyword && p.kind == ParameterKind::PositionalOnly) => {
                return Some(format!("got positional-only argument `{}` passed as keyword", keyword));
            }
            None => return Some(format!("got an unexpected keyword argument `{}`", keyword)),
        }
    }

    let missing: Vec<String> = parameters
        .iter()
        .filter(|p| p.is_positional() || p.kind == ParameterKind::KeywordOnly)
        .filter(|p| !p.has_default && !bound.contains(&p.name.as_str()))
        .map(|p| format!("`{}`", p.name))
        .collect();
    if !missing.is_empty() {
        return Some(format!(
            "missing required argument{} {}",
            plural(missing.len()),
            missing.join(", ")
        ));
    }

    None
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, kind: ParameterKind, has_default: bool) -> Parameter {
        Parameter {
            name: name.to_string(),
            annotation: None,
            has_default,
            kind,
        }
    }

    fn call(positional: usize, keywords: &[&str]) -> CallArguments {
        CallArguments {
            positional,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            has_splat: false,
        }
    }

    fn get_signature() -> Vec<Parameter> {
        vec![
            param("self", ParameterKind::Positional, false),
            param("key", ParameterKind::Positional, false),
            param("default", ParameterKind::Positional, true),
        ]
    }

    #[test]
    fn test_defaults_and_self() {
        let params = get_signature();
        assert_eq!(check_call(&params, true, &call(1, &[])), None);
        assert_eq!(check_call(&params, true, &call(2, &[])), None);
        assert_eq!(check_call(&params, true, &call(1, &["default"])), None);
        assert!(check_call(&params, true, &call(0, &[])).unwrap().contains("`key`"));
        assert!(check_call(&params, true, &call(3, &[])).unwrap().contains("at most 2"));
    }

    #[test]
    fn test_keywords() {
        let params = get_signature();
        assert!(check_call(&params, true, &call(1, &["missing"]))
            .unwrap()
            .contains("unexpected keyword"));
        assert!(check_call(&params, true, &call(1, &["key"]))
            .unwrap()
            .contains("multiple values"));

        let mut open = get_signature();
        open.push(param("kwargs", ParameterKind::VarKeyword, false));
        assert_eq!(check_call(&open, true, &call(1, &["anything"])), None);
    }

    #[test]
    fn test_variadics_and_keyword_only() {
        let params = vec![
            param("args", ParameterKind::VarPositional, false),
            param("timeout", ParameterKind::KeywordOnly, false),
        ];
        assert_eq!(check_call(&params, false, &call(5, &["timeout"])), None);
        assert!(check_call(&params, false, &call(5, &[])).unwrap().contains("`timeout`"));
    }

    #[test]
    fn test_positional_only_rejects_keywords() {
        let params = vec![
            param("self", ParameterKind::PositionalOnly, false),
            param("value", ParameterKind::PositionalOnly, false),
            param("scale", ParameterKind::Positional, true),
        ];
        assert_eq!(check_call(&params, true, &call(1, &["scale"])), None);
        assert!(check_call(&params, true, &call(0, &["value"]))
            .unwrap()
            .contains("positional-only argument `value`"));
        assert!(check_call(&params, true, &call(0, &[])).unwrap().contains("`value`"));

        let mut open = params.clone();
        open.push(param("options", ParameterKind::VarKeyword, false));
        // `value` lands in `**options`, so the positional is still missing
        assert!(check_call(&open, true, &call(0, &["value"])).unwrap().contains("missing required argument `value`"));
        assert_eq!(check_call(&open, true, &call(1, &["value"])), None);
    }

    #[test]
    fn test_splat_is_not_checked() {
        let arguments = CallArguments {
            positional: 9,
            keywords: vec!["bogus".to_string()],
            has_splat: true,
        };
        assert_eq!(check_call(&get_signature(), true, &arguments), None);
    }
}
