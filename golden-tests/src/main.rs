use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use std::process::Command;

static ARGS_FILE: &str = "args";
static EXPECTED_STDOUT_FILE: &str = "expected-stdout";

/// Files written by the workbench, with the name of their expected counterpart
static OUTPUT_FILES: &[(&str, &str)] = &[
    ("replay-log.json", "expected-replay-log"),
    ("flow-report.json", "expected-flow-report"),
];

struct TestCase {
    dir: PathBuf,
    name: String,
    args: String,
}

fn main() -> anyhow::Result<()> {
    let mut test_cases = Vec::new();
    let test_dirs =
        std::fs::read_dir("golden-tests/tests").context("golden tests root directory not found")?;
    for entry in test_dirs {
        let entry = entry?;
        let path = entry.path();

        if !path.is_dir() {
            println!(
                "skipping path `{}` because it's not a directory",
                path.display()
            );
            continue;
        }

        let args_path = path.join(ARGS_FILE);
        let args = std::fs::read_to_string(&args_path)
            .with_context(|| format!("no `{ARGS_FILE}` file found at `{}`", args_path.display()))?;

        test_cases.push(TestCase {
            name: path.display().to_string(),
            dir: path,
            args,
        })
    }
    test_cases.sort_by(|a, b| a.name.cmp(&b.name));

    let mut errored = false;
    for test_case in test_cases {
        let name = test_case.name.clone();
        if let Err(e) = run_flow_workbench(test_case) {
            println!("Error running golden test `{name}`");
            match e {
                TestError::Internal(e) => println!("{e:?}"),
                TestError::Compare(diffs) => {
                    for (what, diff) in diffs {
                        println!("Expected {what} differs from actual {what}:\n{diff}\n");
                    }
                }
            }
            errored = true;
        } else {
            println!("{name}: ✅");
        }
    }

    if errored {
        bail!("one or more golden tests failed");
    }

    Ok(())
}

enum TestError {
    Internal(anyhow::Error),
    /// Pairs of compared output name and rendered diff
    Compare(Vec<(String, String)>),
}

fn run_flow_workbench(test_case: TestCase) -> Result<(), TestError> {
    let workbench_args = test_case.args.split_whitespace();
    let command = Command::new("cargo")
        .arg("run")
        .arg("--release")
        .arg("--bin")
        .arg("flow-workbench")
        .arg("--")
        .args(workbench_args)
        .output()
        .context("flow-workbench process crashed")
        .map_err(TestError::Internal)?;

    if !command.status.success() {
        return Err(TestError::Internal(anyhow::anyhow!(
            "flow-workbench exited with {}:\n{}",
            command.status,
            String::from_utf8_lossy(&command.stderr)
        )));
    }

    let mut diffs = Vec::new();

    let stdout = String::from_utf8_lossy(&command.stdout);
    if let Some(diff) = compare_or_record(&test_case.dir.join(EXPECTED_STDOUT_FILE), &stdout)
        .map_err(TestError::Internal)?
    {
        diffs.push(("stdout".to_string(), diff));
    }

    for (output_file, expected_file) in OUTPUT_FILES {
        let actual = std::fs::read_to_string(output_file)
            .with_context(|| format!("failed to read {output_file}"))
            .map_err(TestError::Internal)?;

        if let Some(diff) = compare_or_record(&test_case.dir.join(expected_file), &actual)
            .map_err(TestError::Internal)?
        {
            diffs.push((output_file.to_string(), diff));
        }
    }

    if diffs.is_empty() {
        Ok(())
    } else {
        Err(TestError::Compare(diffs))
    }
}

/// Diffs `actual` against the expected file, or records it as expected if the file is missing
fn compare_or_record(expected_path: &Path, actual: &str) -> anyhow::Result<Option<String>> {
    if !expected_path.is_file() {
        std::fs::write(expected_path, actual.as_bytes())
            .with_context(|| format!("failed to persist `{}`", expected_path.display()))?;
        return Ok(None);
    }

    let expected = std::fs::read_to_string(expected_path)
        .with_context(|| format!("failed to read `{}`", expected_path.display()))?;
    if expected == actual {
        Ok(None)
    } else {
        Ok(Some(diff::diff_to_string(&expected, actual)))
    }
}

mod diff {
    use console::{Style, style};
    use similar::{ChangeTag, TextDiff};
    use std::fmt::{self, Write};

    struct Line(Option<usize>);

    impl fmt::Display for Line {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            match self.0 {
                None => write!(f, "    "),
                Some(idx) => write!(f, "{:<4}", idx + 1),
            }
        }
    }

    pub fn diff_to_string(old: &str, new: &str) -> String {
        let mut output = String::new();
        let diff = TextDiff::from_lines(old, new);

        for (idx, group) in diff.grouped_ops(3).iter().enumerate() {
            if idx > 0 {
                _ = writeln!(output, "{:-^1$}", "-", 80);
            }
            for op in group {
                for change in diff.iter_inline_changes(op) {
                    let (sign, s) = match change.tag() {
                        ChangeTag::Delete => ("-", Style::new().red()),
                        ChangeTag::Insert => ("+", Style::new().green()),
                        ChangeTag::Equal => (" ", Style::new().dim()),
                    };
                    _ = write!(
                        output,
                        "{}{} |{}",
                        style(Line(change.old_index())).dim(),
                        style(Line(change.new_index())).dim(),
                        s.apply_to(sign).bold(),
                    );
                    for (emphasized, value) in change.iter_strings_lossy() {
                        if emphasized {
                            _ = write!(output, "{}", s.apply_to(value).underlined().on_black());
                        } else {
                            _ = write!(output, "{}", s.apply_to(value));
                        }
                    }
                    if change.missing_newline() {
                        _ = writeln!(output);
                    }
                }
            }
        }

        output
    }
}
