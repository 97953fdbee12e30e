use datatest_stable::Utf8Path;
use gloop::{compile, run, Error};

#[derive(thiserror::Error, Debug)]
#[error("program datatest failed at {0}")]
pub struct DatatestError(Box<Utf8Path>);

/// A parsed test file: expected diagnostics, expected run result, program
/// source, and the `;` comments of the first two sections with their line.
struct DatatestFile<'a> {
    diagnostics: Vec<&'a str>,
    outcome: Vec<&'a str>,
    source: String,
    comments: Vec<(usize, &'a str)>,
    /// Line of the `---` that ends the diagnostics
    separator: usize,
}

impl DatatestFile<'_> {
    /// Whether each comment sits in the outcome section rather than the
    /// diagnostics.
    fn comment_sections(&self) -> Vec<(bool, &str)> {
        self.comments
            .iter()
            .map(|&(line, comment)| (line > self.separator, comment))
            .collect()
    }
}

/// Comments past the diagnostics move by `shift` lines along with the
/// outcome section.
fn flush_comments<'a>(
    lines: &mut Vec<&'a str>,
    comments: &mut Vec<(usize, &'a str)>,
    separator: usize,
    shift: isize,
) {
    while let Some(&(line, comment)) = comments.last() {
        let line = match line > separator {
            true => line.saturating_add_signed(shift),
            false => line,
        };
        if line > lines.len() {
            break;
        }
        lines.push(comment);
        comments.pop();
    }
}

// from https://matklad.github.io/2021/05/31/how-to-test.html
// with DATATEST_EXPECT set, rewrite the test file from what actually happened
// instead of failing.
fn stitch_to_datatest(
    diagnostics: &[String],
    outcome: &[String],
    source: &str,
    file: &DatatestFile,
) -> String {
    let mut comments: Vec<(usize, &str)> = file.comments.clone();
    // reverse for nice processing
    comments.reverse();

    let mut lines = vec![];
    let shift = diagnostics.len() as isize - file.diagnostics.len() as isize;
    let separator = file.separator;
    for diagnostic in diagnostics {
        flush_comments(&mut lines, &mut comments, separator, shift);
        lines.push(diagnostic.as_str());
    }
    flush_comments(&mut lines, &mut comments, separator, shift);
    lines.push("---");
    for outcome in outcome {
        flush_comments(&mut lines, &mut comments, separator, shift);
        lines.push(outcome.as_str());
    }
    // Push in the remaining comments
    lines.extend(comments.iter().rev().map(|&(_, comment)| comment));
    lines.push("---");
    lines.extend(source.lines());

    lines.join("\n") + "\n"
}

fn read_datatest(contents: &str) -> DatatestFile {
    #[derive(PartialEq, Eq, Debug, Default)]
    enum Section {
        #[default]
        Diagnostics,
        Outcome,
        Source,
    }
    let mut section = Section::default();
    let mut file = DatatestFile {
        diagnostics: vec![],
        outcome: vec![],
        source: String::new(),
        comments: vec![],
        separator: usize::MAX,
    };

    for (idx, line) in contents.lines().enumerate() {
        if section != Section::Source && line.trim_start().starts_with(';') {
            file.comments.push((idx, line));
            continue;
        }

        match section {
            Section::Diagnostics if line.trim_end() == "---" => {
                file.separator = idx;
                section = Section::Outcome;
            }
            Section::Diagnostics => file.diagnostics.push(line),
            Section::Outcome if line.trim_end() == "---" => section = Section::Source,
            Section::Outcome => file.outcome.push(line),
            Section::Source => {
                if !file.source.is_empty() {
                    file.source.push('\n');
                }
                file.source.push_str(line);
            }
        }
    }
    file
}

/// Compile and run, describing the result as diagnostic and outcome lines.
fn evaluate(source: &str) -> (Vec<String>, Vec<String>) {
    let chunk = match compile(source) {
        Ok(chunk) => chunk,
        Err(Error::Lex(err)) => {
            return (vec![format!("lex {}:{} {}", err.line, err.column, err.error)], vec![])
        }
        Err(Error::Compile(errors)) => {
            let diagnostics = errors
                .iter()
                .map(|err| format!("{} {}:{}", err.code, err.line, err.column))
                .collect();
            return (diagnostics, vec![]);
        }
        Err(Error::Runtime(fault)) => unreachable!("compiling cannot fault: {fault}"),
    };

    let outcome = match run(&chunk) {
        Ok(value) => format!("output {value}"),
        Err(fault) => format!("fault {}", fault.kind),
    };
    (vec![], vec![outcome])
}

fn trimmed(lines: &[&str]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn program_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let file = read_datatest(&contents);
    let (diagnostics, outcome) = evaluate(&file.source);

    if std::env::var("DATATEST_EXPECT").is_ok() {
        std::fs::write(
            path,
            stitch_to_datatest(&diagnostics, &outcome, &file.source, &file),
        )?;
        return Ok(());
    }

    let mut failed = false;
    if trimmed(&file.diagnostics) != diagnostics {
        println!(
            "error in {path}: mismatched diagnostics\n\nGot:\n{}\n\nExpected:\n{}",
            diagnostics.join("\n"),
            file.diagnostics.join("\n")
        );
        failed = true;
    }
    if trimmed(&file.outcome) != outcome {
        println!(
            "error in {path}: mismatched outcome\n\nGot:\n{}\n\nExpected:\n{}",
            outcome.join("\n"),
            file.outcome.join("\n")
        );
        failed = true;
    }

    if failed {
        Err(DatatestError(Box::from(path)))?
    } else {
        Ok(())
    }
}

/// Rewriting a file from actual results must keep every comment in the
/// section it was written in. The files under `tests/rewrite_data` carry
/// stale expectations on purpose.
fn rewrite_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let file = read_datatest(&contents);
    let (diagnostics, outcome) = evaluate(&file.source);
    let rewritten = stitch_to_datatest(&diagnostics, &outcome, &file.source, &file);
    let reread = read_datatest(&rewritten);

    if trimmed(&reread.diagnostics) != diagnostics
        || trimmed(&reread.outcome) != outcome
        || reread.source != file.source
        || reread.comment_sections() != file.comment_sections()
    {
        println!("error in {path}: rewriting moved things around\n\nGot:\n{rewritten}");
        Err(DatatestError(Box::from(path)))?
    }
    Ok(())
}

datatest_stable::harness! {
    program_test, "tests/test_data", r"^.*\.gloop",
    rewrite_test, "tests/rewrite_data", r"^.*\.gloop",
}
