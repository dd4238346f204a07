//! Kernel source assembly: an indentation-aware text builder and the
//! four-region kernel document built from it.

const INDENT: &str = "    ";

/// Indentation change applied around a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indent {
    Keep,
    /// Outdent before writing (closing brace).
    Outdent,
    /// Indent after writing (opening brace).
    Indent,
}

/// Text builder that prefixes every line with the current indentation.
#[derive(Clone, Debug, Default)]
pub struct SourceBuilder {
    text: String,
    level: usize,
    /// Whether nothing has been written since the last newline.
    at_line_start: bool,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            level: 0,
            at_line_start: true,
        }
    }

    /// A builder whose lines start `level` indents deep.
    pub fn indented(level: usize) -> Self {
        Self {
            level,
            ..Self::new()
        }
    }

    pub fn is_at_line_start(&self) -> bool {
        self.at_line_start
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn indent(&mut self) {
        self.level += 1;
    }

    pub fn outdent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    /// Append text without ending the line.
    pub fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.at_line_start {
            self.write_indent();
            self.at_line_start = false;
        }
        self.text.push_str(text);
    }

    /// Append text and end the line.
    pub fn append_line(&mut self, text: &str) {
        self.append_line_with(text, Indent::Keep);
    }

    pub fn append_line_with(&mut self, text: &str, indent: Indent) {
        if indent == Indent::Outdent {
            self.outdent();
        }
        self.append(text);
        self.text.push('\n');
        self.at_line_start = true;
        if indent == Indent::Indent {
            self.indent();
        }
    }

    /// Terminate the current line if anything is pending on it.
    pub fn end_line(&mut self, terminator: &str) {
        if !self.at_line_start {
            self.append_line(terminator);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }

    fn write_indent(&mut self) {
        for _ in 0..self.level {
            self.text.push_str(INDENT);
        }
    }
}

/// The kernel document: header, struct declarations, buffer declarations
/// and entry-point body, assembled in that order whatever order they were
/// written in.
#[derive(Clone, Debug)]
pub struct KernelSource {
    header: SourceBuilder,
    structs: SourceBuilder,
    buffers: SourceBuilder,
    body: SourceBuilder,
    /// Buffer whose length bounds the invocation range.
    guard: Option<String>,
}

impl KernelSource {
    pub fn new(workgroup_size: u32) -> Self {
        let mut header = SourceBuilder::new();
        header.append_line(&format!("const WORKGROUP_SIZE: u32 = {workgroup_size}u;"));
        Self {
            header,
            structs: SourceBuilder::new(),
            buffers: SourceBuilder::new(),
            body: SourceBuilder::indented(1),
            guard: None,
        }
    }

    pub fn declare_struct(&mut self, name: &str, fields: &[(String, String)]) {
        self.structs
            .append_line_with(&format!("struct {name} {{"), Indent::Indent);
        for (field, ty) in fields {
            self.structs.append_line(&format!("{field}: {ty},"));
        }
        self.structs.append_line_with("}", Indent::Outdent);
    }

    pub fn declare_buffer(&mut self, slot: u32, name: &str, element: &str, read_only: bool) {
        let access = if read_only { "read" } else { "read_write" };
        self.buffers.append_line(&format!(
            "@group(0) @binding({slot}) var<storage, {access}> {name}: array<{element}>;"
        ));
    }

    /// Invocations at or past the length of `buffer` return immediately.
    pub fn guard_with(&mut self, buffer: &str) {
        self.guard = Some(buffer.to_string());
    }

    pub fn body(&mut self) -> &mut SourceBuilder {
        &mut self.body
    }

    pub fn finish(self) -> String {
        let mut out = String::new();
        out.push_str(self.header.as_str());
        for region in [&self.structs, &self.buffers] {
            if !region.is_empty() {
                out.push('\n');
                out.push_str(region.as_str());
            }
        }

        let mut entry = SourceBuilder::new();
        entry.append_line("@compute @workgroup_size(WORKGROUP_SIZE)");
        entry.append_line_with(
            "fn main(@builtin(global_invocation_id) gid: vec3<u32>) {",
            Indent::Indent,
        );
        if let Some(buffer) = &self.guard {
            entry.append_line_with(
                &format!("if (gid.x >= arrayLength(&{buffer})) {{"),
                Indent::Indent,
            );
            entry.append_line("return;");
            entry.append_line_with("}", Indent::Outdent);
        }
        out.push('\n');
        out.push_str(entry.as_str());
        out.push_str(self.body.as_str());
        out.push_str("}\n");
        out
    }
}
