//! Operator input parsing.

use crate::target::StepDepth;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PrintAll,
    Print(String),
    Breakpoints,
    Breakpoint(u32),
    /// `breakpoint` followed by something that is not a positive line number.
    InvalidBreakpoint(String),
    Step(StepDepth),
    Continue,
    Quit,
    Invalid,
}

impl Command {
    /// Commands match their exact text once the ends are trimmed; `print` and
    /// `breakpoint` take whatever follows a single space as their argument.
    pub fn parse(input: &str) -> Command {
        let input = input.trim();
        match input {
            "print" => return Command::PrintAll,
            "breakpoints" => return Command::Breakpoints,
            "step over" => return Command::Step(StepDepth::Over),
            "step into" => return Command::Step(StepDepth::Into),
            "step out" => return Command::Step(StepDepth::Out),
            "continue" => return Command::Continue,
            "quit" => return Command::Quit,
            _ => {}
        }

        if let Some(name) = input.strip_prefix("print ") {
            return Command::Print(name.to_string());
        }
        if let Some(arg) = input.strip_prefix("breakpoint ") {
            return match parse_line_number(arg) {
                Some(line) => Command::Breakpoint(line),
                None => Command::InvalidBreakpoint(arg.to_string()),
            };
        }
        Command::Invalid
    }
}

fn parse_line_number(text: &str) -> Option<u32> {
    text.parse::<u32>().ok().filter(|line| *line > 0)
}

/// Line numbers from the startup prompt: distinct, in entry order.
///
/// Tokens that are not positive integers are dropped.
pub fn parse_initial_breakpoints(input: &str) -> Vec<u32> {
    let mut lines = Vec::new();
    for line in input.split_whitespace().filter_map(parse_line_number) {
        if !lines.contains(&line) {
            lines.push(line);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_the_command_grammar() {
        assert_eq!(Command::parse("print"), Command::PrintAll);
        assert_eq!(Command::parse("  print arr \n"), Command::Print("arr".to_string()));
        assert_eq!(Command::parse("breakpoints"), Command::Breakpoints);
        assert_eq!(Command::parse("breakpoint 12"), Command::Breakpoint(12));
        assert_eq!(Command::parse("step over"), Command::Step(StepDepth::Over));
        assert_eq!(Command::parse("step into"), Command::Step(StepDepth::Into));
        assert_eq!(Command::parse("step out"), Command::Step(StepDepth::Out));
        assert_eq!(Command::parse("continue"), Command::Continue);
        assert_eq!(Command::parse("quit"), Command::Quit);
    }

    #[test]
    fn anything_else_is_invalid() {
        for input in [
            "",
            "Print",
            "continue now",
            "step",
            "step sideways",
            "step  over",
            "step\tover",
            "breakpoints 3",
            "print\targ",
            "go",
        ] {
            assert_eq!(Command::parse(input), Command::Invalid, "{input:?}");
        }
        assert_eq!(Command::parse("breakpoint"), Command::Invalid);
    }

    #[test]
    fn arguments_follow_a_single_space_verbatim() {
        assert_eq!(Command::parse("print   x"), Command::Print("  x".to_string()));
        assert_eq!(
            Command::parse("breakpoint  5"),
            Command::InvalidBreakpoint(" 5".to_string())
        );
    }

    #[test]
    fn malformed_breakpoint_lines_are_kept_for_the_message() {
        assert_eq!(
            Command::parse("breakpoint abc"),
            Command::InvalidBreakpoint("abc".to_string())
        );
        assert_eq!(
            Command::parse("breakpoint 0"),
            Command::InvalidBreakpoint("0".to_string())
        );
        assert_eq!(
            Command::parse("breakpoint -4"),
            Command::InvalidBreakpoint("-4".to_string())
        );
    }

    #[test]
    fn initial_breakpoints_drop_junk_and_duplicates() {
        assert_eq!(parse_initial_breakpoints("12 7 x 12 0 -3 13"), vec![12, 7, 13]);
        assert!(parse_initial_breakpoints("   ").is_empty());
    }
}
