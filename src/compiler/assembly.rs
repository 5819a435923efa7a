//! Optimization levels and assembly listing cleanup

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;

/// Optimization levels accepted for assembly output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    #[default]
    O0,
    O1,
    O2,
    O3,
    Os,
}

impl OptLevel {
    /// Accepts `O2`, `2`, `-O2` and friends
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let value = value.strip_prefix('-').unwrap_or(value);
        let value = value
            .strip_prefix('O')
            .or_else(|| value.strip_prefix('o'))
            .unwrap_or(value);

        match value {
            "0" => Some(OptLevel::O0),
            "1" => Some(OptLevel::O1),
            "2" => Some(OptLevel::O2),
            "3" => Some(OptLevel::O3),
            "s" => Some(OptLevel::Os),
            _ => None,
        }
    }

    /// Level requested by a caller; anything unrecognized becomes `O0`
    pub fn from_request(value: Option<&str>) -> Self {
        match value {
            None => OptLevel::default(),
            Some(raw) => Self::parse(raw).unwrap_or_else(|| {
                warn!("Unknown optimization level {:?}, using O0", raw);
                OptLevel::default()
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptLevel::O0 => "O0",
            OptLevel::O1 => "O1",
            OptLevel::O2 => "O2",
            OptLevel::O3 => "O3",
            OptLevel::Os => "Os",
        }
    }

    pub fn flag(&self) -> String {
        format!("-{}", self.as_str())
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directives that only matter to the assembler or debugger
const NOISE_DIRECTIVES: &[&str] = &[
    ".loc", ".file", ".ident", ".align", ".p2align", ".balign", ".size", ".type",
];

fn debug_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\.(?:LFB\d+|LFE\d+|Ltext\d*|Letext\d*|Ldebug\w*):").unwrap()
    })
}

fn is_noise(line: &str) -> bool {
    let trimmed = line.trim();
    let Some(directive) = trimmed.split_whitespace().next() else {
        return false;
    };

    if directive.starts_with(".cfi_") || directive.starts_with(".addrsig") {
        return true;
    }
    if NOISE_DIRECTIVES.contains(&directive) {
        return true;
    }
    if directive == ".section" {
        let section = trimmed[directive.len()..].to_ascii_lowercase();
        return !(section.contains("text") || section.contains("rodata"));
    }
    debug_label_regex().is_match(trimmed)
}

fn push_blanks(lines: &mut Vec<&str>, run: usize) {
    let keep = if run >= 3 { 1 } else { run };
    lines.extend(std::iter::repeat("").take(keep));
}

/// Strip assembler bookkeeping so only the interesting code remains.
///
/// Runs of three or more blank lines collapse to one.
pub fn filter_assembly(asm: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;

    for line in asm.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if is_noise(line) {
            continue;
        }
        push_blanks(&mut lines, blank_run);
        blank_run = 0;
        lines.push(line);
    }
    push_blanks(&mut lines, blank_run);

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(OptLevel::parse("O2"), Some(OptLevel::O2));
        assert_eq!(OptLevel::parse("-O3"), Some(OptLevel::O3));
        assert_eq!(OptLevel::parse("1"), Some(OptLevel::O1));
        assert_eq!(OptLevel::parse("s"), Some(OptLevel::Os));
        assert_eq!(OptLevel::parse("Os"), Some(OptLevel::Os));
        assert_eq!(OptLevel::parse("Ofast"), None);
        assert_eq!(OptLevel::parse("-O"), None);
        assert_eq!(OptLevel::parse("O2 -fplugin=evil.so"), None);
    }

    #[test]
    fn test_invalid_level_falls_back() {
        assert_eq!(OptLevel::from_request(Some("O9")), OptLevel::O0);
        assert_eq!(OptLevel::from_request(Some("; rm -rf /")), OptLevel::O0);
        assert_eq!(OptLevel::from_request(None), OptLevel::O0);
        assert_eq!(OptLevel::from_request(Some("O2")).flag(), "-O2");
    }

    #[test]
    fn test_filter_drops_bookkeeping() {
        let asm = "\t.file\t\"code.c\"\n\
\t.text\n\
\t.section\t.rodata\n\
.LC0:\n\
\t.string\t\"%d\\n\"\n\
\t.text\n\
\t.globl\tmain\n\
\t.type\tmain, @function\n\
main:\n\
.LFB0:\n\
\t.cfi_startproc\n\
\tpushq\t%rbp\n\
\t.cfi_def_cfa_offset 16\n\
\tmovl\t$0, %eax\n\
\tret\n\
\t.cfi_endproc\n\
.LFE0:\n\
\t.size\tmain, .-main\n\
\t.ident\t\"GCC: (GNU) 13.2.0\"\n\
\t.section\t.note.GNU-stack,\"\",@progbits\n";

        let filtered = filter_assembly(asm);

        assert_eq!(
            filtered,
            "\t.text\n\
\t.section\t.rodata\n\
.LC0:\n\
\t.string\t\"%d\\n\"\n\
\t.text\n\
\t.globl\tmain\n\
main:\n\
\tpushq\t%rbp\n\
\tmovl\t$0, %eax\n\
\tret\n"
        );
    }

    #[test]
    fn test_filter_keeps_user_labels() {
        let asm = ".L2:\n\tjmp\t.L2\n.Ldebug_info0:\n\t.p2align 4\n";
        assert_eq!(filter_assembly(asm), ".L2:\n\tjmp\t.L2\n");
    }

    #[test]
    fn test_blank_runs_collapse() {
        let asm = "a:\n\n\n\n\nb:\n\nc:\n\n\nd:\n";
        assert_eq!(filter_assembly(asm), "a:\n\nb:\n\nc:\n\n\nd:\n");
    }
}
