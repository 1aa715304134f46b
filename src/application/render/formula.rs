//! Formula inspection: classify the input and decide how it enters math mode.

const MATH_ENVIRONMENTS: &[&str] = &[
    "equation", "align", "gather", "multline", "split", "matrix", "bmatrix", "pmatrix",
    "vmatrix", "Vmatrix", "array", "cases", "aligned", "gathered",
];

const CHEMISTRY_COMMANDS: &[&str] = &["\\ce{", "\\chemfig{", "\\schemestart", "\\arrow"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaKind {
    Math,
    Chemistry,
}

impl FormulaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaKind::Math => "math",
            FormulaKind::Chemistry => "chemistry",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormulaFeatures {
    pub chemistry_commands: bool,
    pub math_environment: bool,
    pub display_delimiters: bool,
    pub inline_delimiters: bool,
    pub non_ascii: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula<'a> {
    pub source: &'a str,
    pub kind: FormulaKind,
    pub features: FormulaFeatures,
}

impl<'a> Formula<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let source = raw.trim();

        let chemistry_commands = CHEMISTRY_COMMANDS.iter().any(|cmd| source.contains(cmd));
        let math_environment = MATH_ENVIRONMENTS.iter().any(|env| {
            source.contains(&format!("\\begin{{{env}}}")) || source.contains(&format!("\\end{{{env}}}"))
        });
        let display_delimiters = (source.contains("\\[") && source.contains("\\]"))
            || (source.len() >= 4 && source.starts_with("$$") && source.ends_with("$$"));
        let inline_delimiters = source.len() >= 2
            && source.starts_with('$')
            && source.ends_with('$')
            && !source.starts_with("$$");

        let kind = if chemistry_commands {
            FormulaKind::Chemistry
        } else {
            FormulaKind::Math
        };

        Self {
            source,
            kind,
            features: FormulaFeatures {
                chemistry_commands,
                math_environment,
                display_delimiters,
                inline_delimiters,
                non_ascii: !source.is_ascii(),
            },
        }
    }

    /// True when the input already chose its own mode (delimiters, environments, chemistry).
    pub fn is_self_delimited(&self) -> bool {
        let f = &self.features;
        f.display_delimiters || f.inline_delimiters || f.math_environment || f.chemistry_commands
    }

    /// Body to place in the document; bare formulas are put into display or inline math.
    pub fn body(&self, display_mode: bool) -> String {
        if self.is_self_delimited() {
            self.source.to_string()
        } else if display_mode {
            format!("\\[ {} \\]", self.source)
        } else {
            format!("${}$", self.source)
        }
    }
}

/// LaTeX size command for a requested font size in points.
pub fn font_size_command(size_pt: u32) -> &'static str {
    match size_pt {
        0..=8 => "tiny",
        9..=10 => "scriptsize",
        11..=12 => "small",
        13..=17 => "large",
        18..=20 => "Large",
        21..=25 => "LARGE",
        _ => "huge",
    }
}
