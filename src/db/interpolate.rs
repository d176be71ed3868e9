//! Client-side parameter interpolation.
//!
//! Used only when the pool is configured with `bind_mode=interpolated`, for
//! endpoints (some connection poolers) that cannot handle the extended query
//! protocol. Parameters are rendered as SQL literals and substituted into the
//! statement text, which is then sent over the simple query protocol.
//!
//! Native binding is the default and should be preferred.

use crate::db::placeholders::ParsedStatement;
use crate::models::QueryParam;

/// Render a parameter as a SQL literal.
///
/// Strings have embedded single quotes doubled. Strings containing a
/// backslash use the `E'...'` form with the backslash doubled, so the literal
/// means the same thing whatever `standard_conforming_strings` is set to.
/// NUL characters cannot be stored in Postgres text and are rejected.
pub fn render_literal(param: &QueryParam) -> Result<String, String> {
    match param {
        QueryParam::Null => Ok("NULL".to_string()),
        QueryParam::Bool(true) => Ok("TRUE".to_string()),
        QueryParam::Bool(false) => Ok("FALSE".to_string()),
        // Parenthesized so `a -?` never turns into a `--` comment
        QueryParam::Int(v) if *v < 0 => Ok(format!("({})", v)),
        QueryParam::Int(v) => Ok(v.to_string()),
        QueryParam::Float(v) => Ok(render_float(*v)),
        QueryParam::String(s) => quote_string(s),
        QueryParam::Json(v) => quote_string(&v.to_string()),
    }
}

fn render_float(v: f64) -> String {
    let text = if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        format!("{:?}", v)
    };
    format!("'{}'::float8", text)
}

fn quote_string(s: &str) -> Result<String, String> {
    if s.contains('\0') {
        return Err("String parameters cannot contain NUL characters".to_string());
    }

    let mut out = String::with_capacity(s.len() + 3);
    if s.contains('\\') {
        out.push_str("E'");
        for c in s.chars() {
            match c {
                '\'' => out.push_str("''"),
                '\\' => out.push_str("\\\\"),
                _ => out.push(c),
            }
        }
    } else {
        out.push('\'');
        for c in s.chars() {
            if c == '\'' {
                out.push('\'');
            }
            out.push(c);
        }
    }
    out.push('\'');
    Ok(out)
}

/// Substitute `params` into the placeholders of `parsed`.
///
/// The parameter count must already match the statement.
pub fn interpolate(parsed: &ParsedStatement<'_>, params: &[QueryParam]) -> Result<String, String> {
    let literals = params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            render_literal(param).map_err(|e| format!("Parameter {}: {}", i + 1, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if parsed.param_count() > literals.len() {
        return Err(format!(
            "Statement expects {} parameters but {} were supplied",
            parsed.param_count(),
            literals.len()
        ));
    }

    Ok(parsed.render(|index| literals[index - 1].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpolated(sql: &str, params: &[QueryParam]) -> String {
        let parsed = ParsedStatement::parse(sql).unwrap();
        interpolate(&parsed, params).unwrap()
    }

    #[test]
    fn test_render_scalars() {
        assert_eq!(render_literal(&QueryParam::Null).unwrap(), "NULL");
        assert_eq!(render_literal(&QueryParam::Bool(true)).unwrap(), "TRUE");
        assert_eq!(render_literal(&QueryParam::Bool(false)).unwrap(), "FALSE");
        assert_eq!(render_literal(&QueryParam::Int(42)).unwrap(), "42");
        assert_eq!(render_literal(&QueryParam::Int(-7)).unwrap(), "(-7)");
        assert_eq!(
            render_literal(&QueryParam::Float(1.5)).unwrap(),
            "'1.5'::float8"
        );
    }

    #[test]
    fn test_render_non_finite_floats() {
        assert_eq!(
            render_literal(&QueryParam::Float(f64::NAN)).unwrap(),
            "'NaN'::float8"
        );
        assert_eq!(
            render_literal(&QueryParam::Float(f64::INFINITY)).unwrap(),
            "'Infinity'::float8"
        );
        assert_eq!(
            render_literal(&QueryParam::Float(f64::NEG_INFINITY)).unwrap(),
            "'-Infinity'::float8"
        );
    }

    #[test]
    fn test_quotes_are_doubled() {
        assert_eq!(
            render_literal(&QueryParam::String("O'Brien".into())).unwrap(),
            "'O''Brien'"
        );
        assert_eq!(
            render_literal(&QueryParam::String("'; DROP TABLE users; --".into())).unwrap(),
            "'''; DROP TABLE users; --'"
        );
    }

    #[test]
    fn test_backslashes_use_escape_string() {
        assert_eq!(
            render_literal(&QueryParam::String(r"C:\dir\'x".into())).unwrap(),
            r"E'C:\\dir\\''x'"
        );
    }

    #[test]
    fn test_nul_is_rejected() {
        assert!(render_literal(&QueryParam::String("a\0b".into())).is_err());
    }

    #[test]
    fn test_json_is_quoted() {
        let param = QueryParam::Json(serde_json::json!({"name": "it's"}));
        assert_eq!(render_literal(&param).unwrap(), r#"'{"name":"it''s"}'"#);
    }

    #[test]
    fn test_interpolate_in_order() {
        let sql = interpolated(
            "SELECT * FROM t WHERE a = ? AND b = ? AND c IS ?",
            &[
                QueryParam::Int(1),
                QueryParam::String("x".into()),
                QueryParam::Null,
            ],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = 1 AND b = 'x' AND c IS NULL");
    }

    #[test]
    fn test_interpolate_numbered_reuses_params() {
        let sql = interpolated(
            "SELECT $2, $1, $2",
            &[QueryParam::Bool(true), QueryParam::String("b".into())],
        );
        assert_eq!(sql, "SELECT 'b', TRUE, 'b'");
    }

    #[test]
    fn test_interpolate_leaves_literal_question_marks() {
        let sql = interpolated(
            "SELECT '?' AS q, ? AS p -- ?",
            &[QueryParam::String("?".into())],
        );
        assert_eq!(sql, "SELECT '?' AS q, '?' AS p -- ?");
    }

    #[test]
    fn test_negative_after_minus_does_not_open_comment() {
        let sql = interpolated("SELECT 10 -?", &[QueryParam::Int(-3)]);
        assert_eq!(sql, "SELECT 10 -(-3)");
        assert!(!sql.contains("--"));
    }

    #[test]
    fn test_interpolate_missing_params() {
        let parsed = ParsedStatement::parse("SELECT ?, ?").unwrap();
        assert!(interpolate(&parsed, &[QueryParam::Int(1)]).is_err());
    }

    #[test]
    fn test_interpolate_reports_bad_parameter_position() {
        let parsed = ParsedStatement::parse("SELECT ?, ?").unwrap();
        let err = interpolate(
            &parsed,
            &[QueryParam::Int(1), QueryParam::String("\0".into())],
        )
        .unwrap_err();
        assert!(err.starts_with("Parameter 2"));
    }
}
