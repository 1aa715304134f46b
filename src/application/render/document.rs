use std::fmt::Write as _;

use tracing::debug;

use super::{
    formula::{Formula, font_size_command},
    options::{Background, Color, RenderOptions},
};

/// Builds the TeX source handed to the compiler.
#[derive(Debug, Clone)]
pub struct DocumentAssembler {
    main_font: String,
    cjk_font: Option<String>,
}

impl DocumentAssembler {
    pub fn new(main_font: impl Into<String>, cjk_font: Option<String>) -> Self {
        Self {
            main_font: main_font.into(),
            cjk_font: cjk_font.filter(|font| !font.trim().is_empty()),
        }
    }

    /// Deterministic: identical input yields identical source. The formula itself is not
    /// validated; syntax errors surface from the compiler log.
    pub fn assemble(&self, formula: &str, options: &RenderOptions) -> String {
        let formula = Formula::parse(formula);
        debug!(
            target = "application::render::document",
            kind = formula.kind.as_str(),
            math_environment = formula.features.math_environment,
            non_ascii = formula.features.non_ascii,
            self_delimited = formula.is_self_delimited(),
            "Formula classified"
        );
        let mut doc = String::with_capacity(512 + formula.source.len());

        doc.push_str("\\documentclass[border=2pt,varwidth]{standalone}\n");
        for package in [
            "\\usepackage{amsmath}",
            "\\usepackage{amssymb}",
            "\\usepackage{xcolor}",
            "\\usepackage[version=4]{mhchem}",
            "\\usepackage{chemfig}",
            "\\usepackage{chemmacros}",
            "\\usepackage{fontspec}",
        ] {
            doc.push_str(package);
            doc.push('\n');
        }
        if let Some(cjk) = &self.cjk_font {
            doc.push_str("\\usepackage{xeCJK}\n");
            let _ = writeln!(doc, "\\setCJKmainfont{{{cjk}}}");
        }
        let _ = writeln!(doc, "\\setmainfont{{{}}}", self.main_font);
        doc.push_str("\\begin{document}\n");

        if let Background::Fill(color) = &options.background {
            let _ = writeln!(doc, "{}", color_directive("pagecolor", color));
        }

        doc.push('{');
        doc.push_str(&color_directive("color", &options.foreground));
        if let Some(size) = options.font_size_pt {
            let _ = write!(doc, "\\{}", font_size_command(size));
        }
        doc.push('\n');
        doc.push_str(&formula.body(options.display_mode));
        doc.push_str("\n}\n");

        doc.push_str("\\end{document}\n");
        doc
    }
}

fn color_directive(command: &str, color: &Color) -> String {
    match color {
        Color::Hex(hex) => format!("\\{command}[HTML]{{{hex}}}"),
        Color::Named(name) => format!("\\{command}{{{name}}}"),
    }
}
