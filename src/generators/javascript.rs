//! Renders a compiled [`Program`] as a self-contained JavaScript parser.
//!
//! Emission is a pure function of the program and the options: constant
//! pools become `peg$c…`/`peg$r…`/`peg$e…` definitions, embedded user code
//! is pasted byte-for-byte as `peg$f…` functions, each rule becomes one
//! `peg$parse<Rule>` function produced by simulating the machine's value
//! stack with numbered `s…` variables, and the fixed runtime skeleton is
//! appended verbatim. A module wrapper is chosen last.

use super::skeleton;
use crate::compiler::ast::Location;
use crate::compiler::bytecode::{
    BoundaryRef, ClassDesc, Expectation, Insn, Program, RuleCode,
};
use crate::compiler::errors::CompileError;
use crate::compiler::{Format, Options};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref JS_IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("a valid pattern");
}

/// Mapping data relating generated lines back to grammar locations;
/// serializing it to a source-map file is left to the caller
#[derive(Debug, Clone, Default)]
pub struct SourceMapping {
    pub entries: Vec<MappingEntry>,
}

#[derive(Debug, Clone)]
pub struct MappingEntry {
    /// 1-based line in the emitted text
    pub generated_line: usize,
    pub location: Location,
}

/// Emit the parser source and its mapping data
pub fn generate_js(
    program: &Program,
    options: &Options,
) -> Result<(String, SourceMapping), CompileError> {
    let dependencies = collect_dependencies(program, options);
    validate(options, &dependencies)?;

    let emitter = Emitter {
        program,
        options,
        dependencies,
        out: String::new(),
        indent: 0,
        line: 1,
        mappings: Vec::new(),
    };

    Ok(emitter.emit())
}

fn collect_dependencies(program: &Program, options: &Options) -> Vec<(String, String)> {
    let mut dependencies: Vec<(String, String)> = options.dependencies.clone();
    for import in &program.imports {
        if !dependencies.iter().any(|(v, _)| *v == import.binding) {
            dependencies.push((import.binding.clone(), import.module.clone()));
        }
    }
    dependencies
}

fn validate(options: &Options, dependencies: &[(String, String)]) -> Result<(), CompileError> {
    let config = |message: String| Err(CompileError::Config { message });

    if !dependencies.is_empty()
        && !matches!(
            options.format,
            Format::Amd | Format::CommonJs | Format::Es | Format::Umd
        )
    {
        return config(format!(
            "Can't use dependencies with the \"{}\" output format",
            options.format
        ));
    }

    for (variable, _) in dependencies {
        if !JS_IDENTIFIER.is_match(variable) {
            return config(format!(
                "Dependency variable \"{}\" is not a valid identifier",
                variable
            ));
        }
    }

    match (&options.export_var, options.format) {
        (Some(variable), Format::Globals | Format::Umd) => {
            if !JS_IDENTIFIER.is_match(variable) {
                return config(format!(
                    "Export variable \"{}\" is not a valid identifier",
                    variable
                ));
            }
        }
        (Some(_), format) => {
            return config(format!(
                "Can't use the \"exportVar\" option with the \"{}\" output format",
                format
            ));
        }
        (None, Format::Globals) => {
            return config("The \"globals\" output format requires an export variable".to_string());
        }
        (None, _) => {}
    }

    Ok(())
}

/// Quote a string as a JavaScript string literal
fn js_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a class pool entry as a JavaScript regular expression literal
fn class_regex(desc: &ClassDesc) -> String {
    let mut flags = String::new();
    if desc.ignore_case {
        flags.push('i');
    }
    if desc.unicode {
        flags.push('u');
    }
    format!("/^{}/{}", desc.display(), flags)
}

struct Emitter<'a> {
    program: &'a Program,
    options: &'a Options,
    dependencies: Vec<(String, String)>,
    out: String,
    indent: usize,
    line: usize,
    mappings: Vec<MappingEntry>,
}

impl<'a> Emitter<'a> {
    fn push_line(&mut self, text: &str) {
        if text.is_empty() {
            self.out.push('\n');
        } else {
            for _ in 0..self.indent {
                self.out.push_str("  ");
            }
            self.out.push_str(text);
            self.out.push('\n');
        }
        self.line += 1;
    }

    fn blank(&mut self) {
        self.push_line("");
    }

    /// Emit a multi-line block, re-indenting each line
    fn push_block(&mut self, text: &str) {
        for line in text.lines() {
            self.push_line(line);
        }
    }

    /// Emit user code exactly as written
    fn push_verbatim(&mut self, text: &str) {
        self.out.push_str(text);
        if !text.ends_with('\n') {
            self.out.push('\n');
        }
        self.line += text.matches('\n').count() + 1;
    }

    /// Record that the next emitted line renders `location`
    fn map_next_line(&mut self, location: &Location) {
        self.mappings.push(MappingEntry {
            generated_line: self.line,
            location: location.clone(),
        });
    }

    fn exports_object(&self) -> String {
        let start_rules = self
            .program
            .start_rules
            .iter()
            .map(|r| js_string(r))
            .collect::<Vec<_>>()
            .join(", ");

        let mut fields = vec![
            format!("StartRules: [{}]", start_rules),
            "SyntaxError: peg$SyntaxError".to_string(),
        ];
        if self.options.trace {
            fields.push("DefaultTracer: peg$DefaultTracer".to_string());
        }
        fields.push("parse: peg$parse".to_string());

        format!("{{ {} }}", fields.join(", "))
    }

    fn emit(mut self) -> (String, SourceMapping) {
        self.push_line("// Generated by Peggy");
        self.push_line("//");
        self.push_line("// https://peggyjs.org/");
        self.blank();

        match self.options.format {
            Format::Bare => {
                self.push_line("(function() {");
                self.indent += 1;
                self.push_line("\"use strict\";");
                self.blank();
                self.emit_body();
                self.blank();
                let exports = self.exports_object();
                self.push_line(&format!("return {};", exports));
                self.indent -= 1;
                self.push_line("})()");
            }

            Format::Globals => {
                self.push_line("(function(root) {");
                self.indent += 1;
                self.push_line("\"use strict\";");
                self.blank();
                self.emit_body();
                self.blank();
                let exports = self.exports_object();
                let variable = self
                    .options
                    .export_var
                    .clone()
                    .unwrap_or_default();
                self.push_line(&format!("root.{} = {};", variable, exports));
                self.indent -= 1;
                self.push_line("})(this);");
            }

            Format::CommonJs => {
                self.push_line("\"use strict\";");
                self.blank();
                for (variable, module) in self.dependencies.clone() {
                    self.push_line(&format!(
                        "var {} = require({});",
                        variable,
                        js_string(&module)
                    ));
                }
                if !self.dependencies.is_empty() {
                    self.blank();
                }
                self.emit_body();
                self.blank();
                let exports = self.exports_object();
                self.push_line(&format!("module.exports = {};", exports));
            }

            Format::Amd => {
                let paths = self
                    .dependencies
                    .iter()
                    .map(|(_, module)| js_string(module))
                    .collect::<Vec<_>>()
                    .join(", ");
                let variables = self
                    .dependencies
                    .iter()
                    .map(|(variable, _)| variable.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.push_line(&format!("define([{}], function({}) {{", paths, variables));
                self.indent += 1;
                self.push_line("\"use strict\";");
                self.blank();
                self.emit_body();
                self.blank();
                let exports = self.exports_object();
                self.push_line(&format!("return {};", exports));
                self.indent -= 1;
                self.push_line("});");
            }

            Format::Umd => {
                let paths = self
                    .dependencies
                    .iter()
                    .map(|(_, module)| js_string(module))
                    .collect::<Vec<_>>()
                    .join(", ");
                let variables = self
                    .dependencies
                    .iter()
                    .map(|(variable, _)| variable.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                let requires = self
                    .dependencies
                    .iter()
                    .map(|(_, module)| format!("require({})", js_string(module)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let globals = self
                    .dependencies
                    .iter()
                    .map(|(variable, _)| format!("root.{}", variable))
                    .collect::<Vec<_>>()
                    .join(", ");

                self.push_line("(function(root, factory) {");
                self.indent += 1;
                self.push_line("if (typeof define === \"function\" && define.amd) {");
                self.push_line(&format!("  define([{}], factory);", paths));
                self.push_line("} else if (typeof module === \"object\" && module.exports) {");
                self.push_line(&format!("  module.exports = factory({});", requires));
                if let Some(variable) = self.options.export_var.clone() {
                    self.push_line("} else {");
                    self.push_line(&format!("  root.{} = factory({});", variable, globals));
                }
                self.push_line("}");
                self.indent -= 1;
                self.push_line(&format!("}})(this, function({}) {{", variables));
                self.indent += 1;
                self.push_line("\"use strict\";");
                self.blank();
                self.emit_body();
                self.blank();
                let exports = self.exports_object();
                self.push_line(&format!("return {};", exports));
                self.indent -= 1;
                self.push_line("});");
            }

            Format::Es => {
                let imports: Vec<String> = self
                    .options
                    .dependencies
                    .iter()
                    .map(|(variable, module)| {
                        format!("import {} from {};", variable, js_string(module))
                    })
                    .chain(self.program.imports.iter().map(|import| {
                        format!(
                            "import * as {} from {};",
                            import.binding,
                            js_string(&import.module)
                        )
                    }))
                    .collect();
                for import in imports {
                    self.push_line(&import);
                }
                if !self.dependencies.is_empty() {
                    self.blank();
                }
                self.emit_body();
                self.blank();
                self.push_line("export {");
                self.push_line("  peg$SyntaxError as SyntaxError,");
                if self.options.trace {
                    self.push_line("  peg$DefaultTracer as DefaultTracer,");
                }
                self.push_line("  peg$parse as parse");
                self.push_line("};");
                self.blank();
                let exports = self.exports_object();
                self.push_line(&format!("export default {};", exports));
            }
        }

        (
            std::mem::take(&mut self.out),
            SourceMapping {
                entries: std::mem::take(&mut self.mappings),
            },
        )
    }

    /// Everything between the wrapper prologue and the export clause
    fn emit_body(&mut self) {
        if let Some(code) = &self.program.top_level_initializer.clone() {
            self.map_next_line(&code.location);
            self.push_verbatim(&code.text);
            self.blank();
        }

        self.push_block(skeleton::OUTER_HELPERS);
        self.blank();

        if self.options.trace {
            self.push_block(skeleton::DEFAULT_TRACER);
            self.blank();
        }

        self.emit_parse_function();
    }

    fn emit_parse_function(&mut self) {
        self.push_line("function peg$parse(input, options) {");
        self.indent += 1;

        self.push_line("options = options !== undefined ? options : {};");
        self.blank();
        self.push_line("var peg$FAILED = {};");
        self.push_line("var peg$source = options.grammarSource;");
        self.blank();

        // Start-rule dispatch
        let table = self
            .program
            .start_rules
            .iter()
            .map(|name| format!("{}: peg$parse{}", js_string(name), name))
            .collect::<Vec<_>>()
            .join(", ");
        self.push_line(&format!("var peg$startRuleFunctions = {{ {} }};", table));
        let default_start = self.program.default_start_rule().to_string();
        self.push_line(&format!(
            "var peg$startRuleFunction = peg$parse{};",
            default_start
        ));
        self.blank();

        self.emit_constant_pools();

        self.push_line("var peg$currPos = 0;");
        self.push_line("var peg$savedPos = 0;");
        self.push_line("var peg$posDetailsCache = [{ line: 1, column: 1 }];");
        self.push_line("var peg$maxFailPos = 0;");
        self.push_line("var peg$maxFailExpected = [];");
        self.push_line("var peg$silentFails = 0;");
        if self.options.cache {
            self.blank();
            self.push_line("var peg$resultsCache = {};");
        }
        if self.options.trace {
            self.blank();
            self.push_line(
                "var peg$tracer = \"tracer\" in options ? options.tracer : new peg$DefaultTracer();",
            );
        }
        self.blank();
        self.push_line("var peg$result;");
        self.blank();

        self.push_line("if (\"startRule\" in options) {");
        self.push_line("  if (!(options.startRule in peg$startRuleFunctions)) {");
        self.push_line(
            "    throw new Error(\"Can't start parsing from rule \\\"\" + options.startRule + \"\\\".\");",
        );
        self.push_line("  }");
        self.blank();
        self.push_line("  peg$startRuleFunction = peg$startRuleFunctions[options.startRule];");
        self.push_line("}");
        self.blank();

        self.push_block(skeleton::PARSE_HELPERS);
        self.blank();

        self.emit_functions();

        if let Some(code) = &self.program.initializer.clone() {
            self.map_next_line(&code.location);
            self.push_verbatim(&code.text);
            self.blank();
        }

        for (index, rule) in self.program.rules.clone().iter().enumerate() {
            self.emit_rule(index, rule);
            self.blank();
        }

        self.push_block(skeleton::PARSE_FOOTER);

        self.indent -= 1;
        self.push_line("}");
    }

    fn emit_constant_pools(&mut self) {
        for (i, literal) in self.program.literals.iter().enumerate() {
            let line = format!("var peg$c{} = {};", i, js_string(literal));
            self.push_line(&line);
        }
        if !self.program.literals.is_empty() {
            self.blank();
        }

        for (i, class) in self.program.classes.iter().enumerate() {
            let line = format!("var peg$r{} = {};", i, class_regex(class));
            self.push_line(&line);
        }
        if !self.program.classes.is_empty() {
            self.blank();
        }

        for (i, expectation) in self.program.expectations.iter().enumerate() {
            let constructor = match expectation {
                Expectation::Literal { text, ignore_case } => format!(
                    "peg$literalExpectation({}, {})",
                    js_string(text),
                    ignore_case
                ),
                Expectation::Class(desc) => {
                    let parts = desc
                        .parts
                        .iter()
                        .map(|part| match part {
                            crate::compiler::ast::ClassPart::Single(c) => {
                                js_string(&c.to_string())
                            }
                            crate::compiler::ast::ClassPart::Range(lo, hi) => format!(
                                "[{}, {}]",
                                js_string(&lo.to_string()),
                                js_string(&hi.to_string())
                            ),
                            crate::compiler::ast::ClassPart::Property { name, negated } => {
                                js_string(&format!(
                                    "\\{}{{{}}}",
                                    if *negated { 'P' } else { 'p' },
                                    name
                                ))
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!(
                        "peg$classExpectation([{}], {}, {})",
                        parts, desc.inverted, desc.ignore_case
                    )
                }
                Expectation::Any => "peg$anyExpectation()".to_string(),
                Expectation::EndOfInput => "peg$endExpectation()".to_string(),
                Expectation::Other(description) => {
                    format!("peg$otherExpectation({})", js_string(description))
                }
            };
            let line = format!("var peg$e{} = {};", i, constructor);
            self.push_line(&line);
        }
        if !self.program.expectations.is_empty() {
            self.blank();
        }
    }

    fn emit_functions(&mut self) {
        for (i, function) in self.program.functions.clone().iter().enumerate() {
            self.map_next_line(&function.location);
            self.push_line(&format!(
                "var peg$f{} = function({}) {{",
                i,
                function.params.join(", ")
            ));
            self.push_verbatim(&function.body);
            self.push_line("};");
        }
        if !self.program.functions.is_empty() {
            self.blank();
        }
    }

    fn emit_rule(&mut self, index: usize, rule: &RuleCode) {
        let mut compiler = RuleCompiler {
            program: self.program,
            lines: Vec::new(),
            indent: 0,
            depth: 0,
            max_depth: 0,
            temps: 0,
        };
        compiler.compile_block(&rule.code);
        debug_assert_eq!(compiler.depth, 1, "a rule body pushes exactly one value");

        self.map_next_line(&rule.location);
        self.push_line(&format!("function peg$parse{}() {{", rule.name));
        self.indent += 1;

        let vars = (0..compiler.max_depth)
            .map(|i| format!("s{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        self.push_line(&format!("var {};", vars));
        if compiler.temps > 0 {
            let temps = (0..compiler.temps)
                .map(|i| format!("t{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            self.push_line(&format!("var {};", temps));
        }
        self.blank();

        if self.options.trace {
            self.push_line("var startPos = peg$currPos;");
            self.blank();
            self.push_line(&format!(
                "peg$tracer.trace({{ type: \"rule.enter\", rule: {}, location: peg$computeLocation(startPos, startPos) }});",
                js_string(&rule.name)
            ));
            self.blank();
        }

        if self.options.cache {
            let rule_count = self.program.rules.len();
            self.push_line(&format!(
                "var key = peg$currPos * {} + {};",
                rule_count, index
            ));
            self.push_line("var cached = peg$resultsCache[key];");
            self.blank();
            self.push_line("if (cached) {");
            self.push_line("  peg$currPos = cached.nextPos;");
            if self.options.trace {
                self.blank();
                self.push_line("  if (cached.result !== peg$FAILED) {");
                self.push_line(&format!(
                    "    peg$tracer.trace({{ type: \"rule.match\", rule: {}, result: cached.result, location: peg$computeLocation(startPos, peg$currPos) }});",
                    js_string(&rule.name)
                ));
                self.push_line("  } else {");
                self.push_line(&format!(
                    "    peg$tracer.trace({{ type: \"rule.fail\", rule: {}, location: peg$computeLocation(startPos, startPos) }});",
                    js_string(&rule.name)
                ));
                self.push_line("  }");
                self.blank();
            }
            self.push_line("  return cached.result;");
            self.push_line("}");
            self.blank();
        }

        for line in compiler.lines.clone() {
            self.push_line(&line);
        }
        self.blank();

        if self.options.cache {
            self.push_line("peg$resultsCache[key] = { nextPos: peg$currPos, result: s0 };");
            self.blank();
        }

        if self.options.trace {
            self.push_line("if (s0 !== peg$FAILED) {");
            self.push_line(&format!(
                "  peg$tracer.trace({{ type: \"rule.match\", rule: {}, result: s0, location: peg$computeLocation(startPos, peg$currPos) }});",
                js_string(&rule.name)
            ));
            self.push_line("} else {");
            self.push_line(&format!(
                "  peg$tracer.trace({{ type: \"rule.fail\", rule: {}, location: peg$computeLocation(startPos, startPos) }});",
                js_string(&rule.name)
            ));
            self.push_line("}");
            self.blank();
        }

        self.push_line("return s0;");
        self.indent -= 1;
        self.push_line("}");
    }
}

/// Compiles one rule's instruction tree into JavaScript statements,
/// simulating the value stack with `s…` variables
struct RuleCompiler<'a> {
    program: &'a Program,
    lines: Vec<String>,
    indent: usize,
    depth: usize,
    max_depth: usize,
    temps: usize,
}

impl<'a> RuleCompiler<'a> {
    fn var(index: usize) -> String {
        format!("s{}", index)
    }

    fn push(&mut self) -> String {
        let name = Self::var(self.depth);
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
        name
    }

    fn pop(&mut self) -> String {
        self.depth -= 1;
        Self::var(self.depth)
    }

    fn top(&self) -> String {
        Self::var(self.depth - 1)
    }

    fn from_top(&self, offset: usize) -> String {
        Self::var(self.depth - 1 - offset)
    }

    fn temp(&mut self) -> String {
        let name = format!("t{}", self.temps);
        self.temps += 1;
        name
    }

    fn line(&mut self, text: String) {
        let mut prefixed = String::new();
        for _ in 0..self.indent {
            prefixed.push_str("  ");
        }
        prefixed.push_str(&text);
        self.lines.push(prefixed);
    }

    fn fail_line(&mut self, target: &str, expectation: usize) {
        self.line(format!("{} = peg$FAILED;", target));
        self.line(format!(
            "if (peg$silentFails === 0) {{ peg$fail(peg$e{}); }}",
            expectation
        ));
    }

    fn compile_block(&mut self, code: &[Insn]) {
        for insn in code {
            self.compile_insn(insn);
        }
    }

    fn compile_insn(&mut self, insn: &Insn) {
        match insn {
            Insn::PushNull => {
                let target = self.push();
                self.line(format!("{} = null;", target));
            }
            Insn::PushFailed => {
                let target = self.push();
                self.line(format!("{} = peg$FAILED;", target));
            }
            Insn::PushEmptyArray => {
                let target = self.push();
                self.line(format!("{} = [];", target));
            }
            Insn::PushEmptyString => {
                let target = self.push();
                self.line(format!("{} = \"\";", target));
            }
            Insn::PushCurrPos => {
                let target = self.push();
                self.line(format!("{} = peg$currPos;", target));
            }

            Insn::Pop => {
                self.pop();
            }
            Insn::PopN(n) => {
                for _ in 0..*n {
                    self.pop();
                }
            }
            Insn::Nip => {
                let kept = self.pop();
                self.pop();
                let target = self.push();
                self.line(format!("{} = {};", target, kept));
            }
            Insn::PopCurrPos => {
                let saved = self.pop();
                self.line(format!("peg$currPos = {};", saved));
            }

            Insn::WrapN(n) => {
                let names: Vec<String> = (0..*n).map(|_| self.pop()).collect();
                let names: Vec<String> = names.into_iter().rev().collect();
                let target = self.push();
                self.line(format!("{} = [{}];", target, names.join(", ")));
            }
            Insn::PluckN { count, picks } => {
                let base = self.depth - count;
                let sources: Vec<String> =
                    picks.iter().map(|&i| Self::var(base + i)).collect();
                for _ in 0..*count {
                    self.pop();
                }
                let target = self.push();
                if sources.len() == 1 {
                    if target != sources[0] {
                        self.line(format!("{} = {};", target, sources[0]));
                    }
                } else {
                    self.line(format!("{} = [{}];", target, sources.join(", ")));
                }
            }
            Insn::TextFromSaved => {
                let saved = self.pop();
                let target = self.push();
                self.line(format!(
                    "{} = input.substring({}, peg$currPos);",
                    target, saved
                ));
            }

            Insn::MatchAny { expectation } => {
                let target = self.push();
                self.line("if (input.length > peg$currPos) {".to_string());
                self.line(format!("  {} = input.charAt(peg$currPos);", target));
                self.line("  peg$currPos++;".to_string());
                self.line("} else {".to_string());
                self.indent += 1;
                self.fail_line(&target, *expectation);
                self.indent -= 1;
                self.line("}".to_string());
            }

            Insn::MatchLiteral {
                literal,
                ignore_case,
                expectation,
            } => {
                let target = self.push();
                let length = self.program.literals[*literal].encode_utf16().count();
                if *ignore_case {
                    self.line(format!(
                        "if (input.substr(peg$currPos, {}).toLowerCase() === peg$c{}.toLowerCase()) {{",
                        length, literal
                    ));
                    self.line(format!(
                        "  {} = input.substr(peg$currPos, {});",
                        target, length
                    ));
                } else if length == 1 {
                    self.line(format!(
                        "if (input.charCodeAt(peg$currPos) === {}) {{",
                        self.program.literals[*literal]
                            .encode_utf16()
                            .next()
                            .unwrap_or(0)
                    ));
                    self.line(format!("  {} = peg$c{};", target, literal));
                } else {
                    self.line(format!(
                        "if (input.substr(peg$currPos, {}) === peg$c{}) {{",
                        length, literal
                    ));
                    self.line(format!("  {} = peg$c{};", target, literal));
                }
                self.line(format!("  peg$currPos += {};", length));
                self.line("} else {".to_string());
                self.indent += 1;
                self.fail_line(&target, *expectation);
                self.indent -= 1;
                self.line("}".to_string());
            }

            Insn::MatchClass { class, expectation } => {
                let target = self.push();
                self.line(format!("{} = input.charAt(peg$currPos);", target));
                self.line(format!("if (peg$r{}.test({})) {{", class, target));
                self.line("  peg$currPos++;".to_string());
                self.line("} else {".to_string());
                self.indent += 1;
                self.fail_line(&target, *expectation);
                self.indent -= 1;
                self.line("}".to_string());
            }

            Insn::Fail { expectation } => {
                let target = self.push();
                self.fail_line(&target, *expectation);
            }

            Insn::CallRule { rule } => {
                let target = self.push();
                self.line(format!(
                    "{} = peg$parse{}();",
                    target, self.program.rules[*rule].name
                ));
            }

            Insn::CallLibrary { import, name, .. } => {
                let target = self.push();
                self.line(format!(
                    "{} = peg$parseLibrary({}, peg$c{});",
                    target, self.program.imports[*import].binding, name
                ));
            }

            Insn::CallAction {
                function,
                discard,
                params,
            } => {
                let args: Vec<String> = params.iter().map(|&o| self.from_top(o)).collect();
                let saved = Self::var(self.depth - discard);
                self.line(format!("peg$savedPos = {};", saved));
                for _ in 0..*discard {
                    self.pop();
                }
                let target = self.push();
                self.line(format!(
                    "{} = peg$f{}({});",
                    target,
                    function,
                    args.join(", ")
                ));
            }

            Insn::CallPredicate {
                function,
                negated,
                params,
            } => {
                let args: Vec<String> = params.iter().map(|&o| self.from_top(o)).collect();
                let target = self.push();
                self.line("peg$savedPos = peg$currPos;".to_string());
                self.line(format!(
                    "{} = peg$f{}({});",
                    target,
                    function,
                    args.join(", ")
                ));
                let test = if *negated {
                    format!("!{}", target)
                } else {
                    target.clone()
                };
                self.line(format!(
                    "if ({}) {{ {} = undefined; }} else {{ {} = peg$FAILED; }}",
                    test, target, target
                ));
            }

            Insn::SilentFailsOn => self.line("peg$silentFails++;".to_string()),
            Insn::SilentFailsOff => self.line("peg$silentFails--;".to_string()),

            Insn::IfError { then, otherwise } => {
                self.compile_condition(&format!("{} === peg$FAILED", self.top()), then, otherwise);
            }
            Insn::IfNotError { then, otherwise } => {
                self.compile_condition(&format!("{} !== peg$FAILED", self.top()), then, otherwise);
            }

            Insn::RepeatStar { element, guard } => {
                self.compile_greedy(element, *guard, false);
            }
            Insn::RepeatPlus { element, guard } => {
                self.compile_greedy(element, *guard, true);
            }
            Insn::RepeatRange {
                element,
                delimiter,
                min,
                max,
                guard,
            } => {
                self.compile_range(element, delimiter.as_deref(), min, max, *guard);
            }
        }
    }

    fn compile_condition(&mut self, condition: &str, then: &[Insn], otherwise: &[Insn]) {
        let entry_depth = self.depth;

        self.line(format!("if ({}) {{", condition));
        self.indent += 1;
        self.compile_block(then);
        let then_depth = self.depth;
        self.indent -= 1;

        if otherwise.is_empty() {
            self.line("}".to_string());
            self.depth = then_depth;
            return;
        }

        self.depth = entry_depth;
        self.line("} else {".to_string());
        self.indent += 1;
        self.compile_block(otherwise);
        debug_assert_eq!(self.depth, then_depth, "branches must rejoin at one depth");
        self.indent -= 1;
        self.line("}".to_string());
        self.depth = then_depth;
    }

    /// `*` and `+` loops; the element block is emitted twice, once for the
    /// first attempt and once inside the loop
    fn compile_greedy(&mut self, element: &[Insn], guard: bool, require_one: bool) {
        let accumulator = self.push();
        self.line(format!("{} = [];", accumulator));

        let (entry, iteration) = if guard {
            let entry = self.temp();
            let iteration = self.temp();
            self.line(format!("{} = peg$currPos;", entry));
            self.line(format!("{} = peg$currPos;", iteration));
            (entry, iteration)
        } else {
            (String::new(), String::new())
        };

        let element_depth = self.depth;
        self.compile_block(element);
        let element_var = self.pop();
        debug_assert_eq!(self.depth, element_depth);

        let emit_loop = |compiler: &mut Self| {
            compiler.line(format!("while ({} !== peg$FAILED) {{", element_var));
            compiler.indent += 1;
            if guard {
                compiler.line(format!(
                    "if (peg$currPos === {}) {{ {} = peg$FAILED; peg$currPos = {}; break; }}",
                    iteration, accumulator, entry
                ));
            }
            compiler.line(format!("{}.push({});", accumulator, element_var));
            if guard {
                compiler.line(format!("{} = peg$currPos;", iteration));
            }
            let depth = compiler.depth;
            compiler.compile_block(element);
            compiler.pop();
            debug_assert_eq!(compiler.depth, depth);
            compiler.indent -= 1;
            compiler.line("}".to_string());
        };

        if require_one {
            self.line(format!("if ({} !== peg$FAILED) {{", element_var));
            self.indent += 1;
            emit_loop(self);
            self.indent -= 1;
            self.line("} else {".to_string());
            self.line(format!("  {} = peg$FAILED;", accumulator));
            self.line("}".to_string());
        } else {
            emit_loop(self);
        }
    }

    fn boundary_expr(&mut self, boundary: &BoundaryRef) -> Option<String> {
        match boundary {
            BoundaryRef::Constant(None) => None,
            BoundaryRef::Constant(Some(n)) => Some(n.to_string()),
            // A null label keeps the bound open, anything else is a number
            BoundaryRef::SlotFromTop(offset) => {
                let slot = self.from_top(*offset);
                Some(format!("({0} === null ? null : +{0})", slot))
            }
            BoundaryRef::Function(function) => Some(format!("peg$f{}()", function)),
        }
    }

    fn compile_range(
        &mut self,
        element: &[Insn],
        delimiter: Option<&[Insn]>,
        min: &BoundaryRef,
        max: &BoundaryRef,
        guard: bool,
    ) {
        // Boundaries read the stack before the accumulator is pushed
        let min_expr = self.boundary_expr(min);
        let max_expr = self.boundary_expr(max);

        let entry = self.temp();
        let count = self.temp();
        let iteration = self.temp();
        self.line(format!("{} = peg$currPos;", entry));
        self.line(format!("{} = 0;", count));

        let min_var = min_expr.map(|expr| {
            let var = self.temp();
            self.line(format!("{} = {};", var, expr));
            var
        });
        let max_var = max_expr.map(|expr| {
            let var = self.temp();
            self.line(format!("{} = {};", var, expr));
            var
        });

        let accumulator = self.push();
        self.line(format!("{} = [];", accumulator));

        let condition = match &max_var {
            Some(max_var) => format!("{} === null || {} < {}", max_var, count, max_var),
            None => "true".to_string(),
        };
        self.line(format!("while ({}) {{", condition));
        self.indent += 1;
        self.line(format!("{} = peg$currPos;", iteration));

        if let Some(delimiter) = delimiter {
            self.line(format!("if ({} > 0) {{", count));
            self.indent += 1;
            let depth = self.depth;
            self.compile_block(delimiter);
            let delimiter_var = self.pop();
            debug_assert_eq!(self.depth, depth);
            self.line(format!(
                "if ({} === peg$FAILED) {{ break; }}",
                delimiter_var
            ));
            self.indent -= 1;
            self.line("}".to_string());
        }

        let depth = self.depth;
        self.compile_block(element);
        let element_var = self.pop();
        debug_assert_eq!(self.depth, depth);

        self.line(format!(
            "if ({} === peg$FAILED) {{ peg$currPos = {}; break; }}",
            element_var, iteration
        ));
        if guard {
            self.line(format!(
                "if (peg$currPos === {}) {{ {} = peg$FAILED; peg$currPos = {}; break; }}",
                iteration, accumulator, entry
            ));
        }
        self.line(format!("{}.push({});", accumulator, element_var));
        self.line(format!("{}++;", count));
        self.indent -= 1;
        self.line("}".to_string());

        if let Some(min_var) = min_var {
            self.line(format!(
                "if ({} !== peg$FAILED && {} !== null && {} < {}) {{",
                accumulator, min_var, count, min_var
            ));
            self.line(format!("  {} = peg$FAILED;", accumulator));
            self.line(format!("  peg$currPos = {};", entry));
            self.line("}".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::generator::generate_bytecode;
    use crate::compiler::parser::parse_grammar;
    use crate::compiler::session::Session;

    fn emit(text: &str, configure: impl FnOnce(&mut Options)) -> String {
        let grammar = parse_grammar(text, None).unwrap();
        let mut options = Options {
            allowed_start_rules: vec![grammar.rules[0].name.clone()],
            ..Options::default()
        };
        configure(&mut options);
        let session = Session::new(Default::default(), None, None);
        let program = generate_bytecode(&grammar, &options, &session);
        let (source, _) = generate_js(&program, &options).unwrap();
        source
    }

    #[test]
    fn bare_format_shape() {
        let source = emit("start = 'a'", |_| {});
        assert!(source.starts_with("// Generated by Peggy"));
        assert!(source.contains("(function() {"));
        assert!(source.contains("function peg$parsestart() {"));
        assert!(source.contains(
            "return { StartRules: [\"start\"], SyntaxError: peg$SyntaxError, parse: peg$parse };"
        ));
        assert!(source.contains("function peg$SyntaxError"));
    }

    #[test]
    fn action_code_is_embedded_verbatim() {
        let source = emit("start = n:'1' {  return +n /* keep  spacing */  ; }", |_| {});
        assert!(source.contains("var peg$f0 = function(n) {"));
        assert!(source.contains("  return +n /* keep  spacing */  ; "));
    }

    #[test]
    fn commonjs_dependencies() {
        let source = emit("start = 'a'", |options| {
            options.format = Format::CommonJs;
            options.dependencies =
                vec![("lib".to_string(), "./lib.js".to_string())];
        });
        assert!(source.contains("var lib = require(\"./lib.js\");"));
        assert!(source.contains("module.exports = {"));
    }

    #[test]
    fn globals_requires_export_var() {
        let grammar = parse_grammar("start = 'a'", None).unwrap();
        let options = Options {
            allowed_start_rules: vec!["start".to_string()],
            format: Format::Globals,
            ..Options::default()
        };
        let session = Session::new(Default::default(), None, None);
        let program = generate_bytecode(&grammar, &options, &session);
        assert!(matches!(
            generate_js(&program, &options),
            Err(CompileError::Config { .. })
        ));
    }

    #[test]
    fn export_var_must_be_an_identifier() {
        let grammar = parse_grammar("start = 'a'", None).unwrap();
        let options = Options {
            allowed_start_rules: vec!["start".to_string()],
            format: Format::Globals,
            export_var: Some("not valid".to_string()),
            ..Options::default()
        };
        let session = Session::new(Default::default(), None, None);
        let program = generate_bytecode(&grammar, &options, &session);
        assert!(matches!(
            generate_js(&program, &options),
            Err(CompileError::Config { .. })
        ));
    }

    #[test]
    fn cache_and_trace_blocks_are_optional() {
        let plain = emit("start = 'a'", |_| {});
        assert!(!plain.contains("peg$resultsCache"));
        assert!(!plain.contains("peg$tracer"));

        let cached = emit("start = 'a'", |options| options.cache = true);
        assert!(cached.contains("var peg$resultsCache = {};"));
        assert!(cached.contains("peg$resultsCache[key]"));

        let traced = emit("start = 'a'", |options| options.trace = true);
        assert!(traced.contains("peg$DefaultTracer"));
        assert!(traced.contains("rule.enter"));
    }

    #[test]
    fn source_mapping_records_rules_and_code() {
        let grammar = parse_grammar("{ const n = 1; }\nstart = x:'a' { return n; }", None).unwrap();
        let options = Options {
            allowed_start_rules: vec!["start".to_string()],
            ..Options::default()
        };
        let session = Session::new(Default::default(), None, None);
        let program = generate_bytecode(&grammar, &options, &session);
        let (_, mapping) = generate_js(&program, &options).unwrap();
        // The initializer, the action and the rule all map back
        assert!(mapping.entries.len() >= 3);
        let mut lines: Vec<usize> = mapping.entries.iter().map(|e| e.generated_line).collect();
        lines.dedup();
        assert_eq!(lines.len(), mapping.entries.len(), "one entry per line");
    }

    #[test]
    fn start_rule_dispatch_table() {
        let grammar = parse_grammar("a = b\nb = 'x'", None).unwrap();
        let options = Options {
            allowed_start_rules: vec!["a".to_string(), "b".to_string()],
            ..Options::default()
        };
        let session = Session::new(Default::default(), None, None);
        let program = generate_bytecode(&grammar, &options, &session);
        let (source, _) = generate_js(&program, &options).unwrap();
        assert!(source.contains(
            "var peg$startRuleFunctions = { \"a\": peg$parsea, \"b\": peg$parseb };"
        ));
        assert!(source.contains("var peg$startRuleFunction = peg$parsea;"));
    }
}
