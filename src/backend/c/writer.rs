/// Accumulates C source text, one statement per line
#[derive(Debug, Default)]
pub struct SourceWriter {
    output: String,
    depth: usize,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_output(self) -> String {
        self.output
    }

    pub fn push_line(&mut self, string: impl AsRef<str>) {
        self.output.push_str(string.as_ref());
        self.output.push('\n');
    }

    pub fn blank(&mut self) {
        self.output.push('\n');
    }

    /// Emits a statement at the current indentation
    pub fn emit(&mut self, string: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.output.push_str("    ");
        }
        self.push_line(string);
    }

    /// Labels sit one level left of the statements they name
    pub fn label(&mut self, name: impl AsRef<str>) {
        let depth = self.depth.saturating_sub(1);
        for _ in 0..depth {
            self.output.push_str("    ");
        }
        self.push_line(format!("{}:;", name.as_ref()));
    }

    /// Emits a line comment. Colors are stripped and the text is kept on a
    /// single line.
    pub fn comment(&mut self, comment: impl AsRef<str>) {
        let text = strip_ansi_escapes::strip_str(comment.as_ref()).replace(['\n', '\r'], " ");
        self.emit(format!("// {text}"));
    }

    pub fn open(&mut self, header: impl AsRef<str>) {
        self.emit(format!("{} {{", header.as_ref()));
        self.depth += 1;
    }

    pub fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.emit("}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_indent_and_labels_outdent() {
        let mut writer = SourceWriter::new();
        writer.open("int f(void)");
        writer.label("bb0");
        writer.comment("\u{1b}[35m1\u{1b}[0m\nnext");
        writer.emit("return 1;");
        writer.close();

        assert_eq!(
            writer.into_output(),
            "int f(void) {\nbb0:;\n    // 1 next\n    return 1;\n}\n"
        );
    }
}
