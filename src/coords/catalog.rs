//! Closed-form inverses for the standard charts, recognized from the text of
//! the forward transforms.

use crate::expr::{Expr, parse};

fn normalized(expr: &Expr) -> String {
    expr.to_string()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .replace("atan2(", "atan(")
}

fn is_any(expr: &Expr, forms: &[&str]) -> bool {
    let text = normalized(expr);
    forms.iter().any(|form| *form == text)
}

const RADIUS_2D: &[&str] = &["sqrt(x^2+y^2)", "sqrt(x*x+y*y)", "length(x,y)"];
const ANGLE_2D: &[&str] = &["atan(y,x)"];
const RADIUS_3D: &[&str] = &["sqrt(x^2+y^2+z^2)", "sqrt(x*x+y*y+z*z)", "length(x,y,z)"];
const POLAR_3D: &[&str] = &[
    "acos(z/sqrt(x^2+y^2+z^2))",
    "acos(z/sqrt(x*x+y*y+z*z))",
    "atan(sqrt(x^2+y^2),z)",
    "atan(sqrt(x*x+y*y),z)",
];

/// Look up a closed-form inverse (Cartesian in terms of `labels`).
pub fn lookup(forward: &[Expr], labels: &[String]) -> Option<Vec<Expr>> {
    let text = |template: &str| -> Option<Expr> {
        let mut source = template.to_string();
        for (idx, label) in labels.iter().enumerate() {
            source = source.replace(&format!("${idx}"), label);
        }
        parse(&source).ok()
    };
    match forward {
        [r, theta] if is_any(r, RADIUS_2D) && is_any(theta, ANGLE_2D) => {
            Some(vec![text("$0*cos($1)")?, text("$0*sin($1)")?])
        }
        [r, theta, z] if is_any(r, RADIUS_2D) && is_any(theta, ANGLE_2D) && is_any(z, &["z"]) => {
            Some(vec![text("$0*cos($1)")?, text("$0*sin($1)")?, text("$2")?])
        }
        [r, theta, phi] if is_any(r, RADIUS_3D) && is_any(theta, POLAR_3D) && is_any(phi, ANGLE_2D) => {
            Some(vec![
                text("$0*sin($1)*cos($2)")?,
                text("$0*sin($1)*sin($2)")?,
                text("$0*cos($1)")?,
            ])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exprs(sources: &[&str]) -> Vec<Expr> {
        sources.iter().map(|s| parse(s).unwrap()).collect()
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_recognizes_polar_spellings() {
        let inverse = lookup(&exprs(&["sqrt(x^2 + y^2)", "atan2(y, x)"]), &labels(&["r", "θ"])).unwrap();
        assert_eq!(inverse[0].to_string(), "r*cos(θ)");
        let inverse = lookup(&exprs(&["sqrt(x*x + y*y)", "atan(y, x)"]), &labels(&["r", "t"])).unwrap();
        assert_eq!(inverse[1].to_string(), "r*sin(t)");
    }

    #[test]
    fn test_spherical_and_unknown() {
        let inverse = lookup(
            &exprs(&["sqrt(x^2 + y^2 + z^2)", "acos(z/sqrt(x^2 + y^2 + z^2))", "atan2(y, x)"]),
            &labels(&["r", "θ", "φ"]),
        )
        .unwrap();
        assert_eq!(inverse[2].to_string(), "r*cos(θ)");
        assert!(lookup(&exprs(&["x + y", "x - y"]), &labels(&["a", "b"])).is_none());
    }
}
