// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{capture, TreeFixture};

use anyhow::Result;
use dotctl::manager::{Manager, SelfExec};
use indoc::{formatdoc, indoc};
use nix::unistd::{getgid, getuid};
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{env, fs::create_dir_all, os::unix::fs::PermissionsExt};

#[test]
fn link_global_package() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.package("sample", ".samplerc", "blah")?;
    fixture.mock_bin("stow", "#!/bin/sh\necho stow \"$@\"\n")?;

    let output = fixture.dotctl(&["files", "install"])?;
    assert!(output.status.success());

    let expect = formatdoc! {"
        SUCCESS stow global sample
        stow -d {} -t {} -R sample

        ",
        fixture.root().display(),
        fixture.home().display(),
    };
    assert_eq!(String::from_utf8(output.stdout)?, expect);

    Ok(())
}

#[test]
fn failed_link_sets_exit_status() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.package("good", ".goodrc", "blah")?;
    fixture.package("bad", ".badrc", "blah")?;
    fixture.mock_bin(
        "stow",
        indoc! {r#"
            #!/bin/sh
            for last; do :; done
            if [ "$last" = "bad" ]; then
                echo "BUG in find_stowed_path? Absolute/relative mismatch" >&2
                echo "conflict on .badrc" >&2
                exit 1
            fi
        "#},
    )?;

    let output = fixture.dotctl(&["files", "install", "--target", "."])?;
    assert!(!output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stdout.contains("SUCCESS stow global good"));
    assert!(stderr.contains("FAILURE stow global bad"));
    assert!(stderr.contains("conflict on .badrc"));
    assert!(!stderr.contains("BUG in find_stowed_path?"));

    Ok(())
}

#[test]
fn missing_root_exits_with_one() -> Result<()> {
    let fixture = TreeFixture::new()?;
    std::fs::remove_dir(fixture.root())?;

    let output = fixture.dotctl(&["files", "install"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8(output.stderr)?.contains("does not exist"));

    Ok(())
}

#[test]
fn failing_script_reports_once() -> Result<()> {
    let fixture = TreeFixture::new()?;
    let script = fixture.script(".setup.d/02-broken", "#!/bin/sh\necho kaboom >&2\nexit 3\n")?;

    let output = fixture.dotctl(&["exec-script", &script.to_string_lossy()])?;
    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8(output.stdout)?;
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stdout.contains("02-broken"));
    assert_eq!(stderr.matches("02-broken exited").count(), 1);
    assert!(stderr.contains("kaboom"));

    Ok(())
}

#[test]
fn setup_batch_continues_past_failure() -> Result<()> {
    // Setup elevates through sudo unless already root.
    if !getuid().is_root() {
        return Ok(());
    }

    let fixture = TreeFixture::new()?;
    let marker = |name: &str| fixture.path().join(name);
    fixture.script(
        ".setup.d/01-first",
        &format!("#!/bin/sh\ntouch {}\n", marker("first").display()),
    )?;
    fixture.script(".setup.d/02-broken", "#!/bin/sh\necho kaboom >&2\nexit 1\n")?;
    fixture.script(
        ".setup.d/03-third",
        &format!("#!/bin/sh\ntouch {}\n", marker("third").display()),
    )?;
    fixture.script(
        ".setup.d/04-fourth",
        &format!("#!/bin/sh\necho \"$SETUP_PATH\" > {}\n", marker("fourth").display()),
    )?;

    let output = fixture.dotctl(&["files", "setup"])?;
    assert!(!output.status.success());
    assert!(marker("first").exists());
    assert!(marker("third").exists());
    assert_eq!(
        std::fs::read_to_string(marker("fourth"))?.trim(),
        fixture.root().join(".setup.d").to_string_lossy()
    );

    let stderr = String::from_utf8(output.stderr)?;
    assert_eq!(stderr.matches("02-broken exited").count(), 1);

    Ok(())
}

#[sealed_test]
fn setup_runs_each_script_in_own_process() -> Result<()> {
    env::set_var("SUDO_UID", getuid().to_string());
    env::set_var("SUDO_GID", getgid().to_string());
    env::set_var("NO_COLOR", "1");
    env::set_var("RUST_LOG", "warn");
    let root = env::current_dir()?;
    let setup = root.join(".setup.d");
    create_dir_all(&setup)?;
    env::set_var("TAGSRC", root.join("no-tags"));

    let scripts = [
        ("01-first", format!("#!/bin/sh\necho $$ > {}\n", root.join("first").display())),
        ("02-broken", "#!/bin/sh\necho kaboom >&2\nexit 1\n".to_owned()),
        ("03-third", format!("#!/bin/sh\necho $$ > {}\n", root.join("third").display())),
    ];
    for (name, body) in &scripts {
        std::fs::write(setup.join(name), body)?;
        std::fs::set_permissions(setup.join(name), std::fs::Permissions::from_mode(0o755))?;
    }

    let manager = Manager::new(&root)?;
    let launcher = SelfExec::new(env!("CARGO_BIN_EXE_dotctl"));
    let (summary, stdout, stderr) = capture(|| manager.setup(&launcher))?;
    let summary = summary?;

    assert_eq!(summary.ran.len(), 3);
    assert_eq!(summary.failed, vec![setup.join("02-broken")]);
    assert!(!summary.is_success());

    let first = std::fs::read_to_string(root.join("first"))?;
    let third = std::fs::read_to_string(root.join("third"))?;
    assert_ne!(first.trim(), third.trim());

    for banner in ["01-first", "02-broken", "03-third"] {
        assert_eq!(stdout.lines().filter(|line| *line == banner).count(), 1);
    }
    assert_eq!(stderr.matches("02-broken exited").count(), 1);
    assert_eq!(stderr.matches("kaboom").count(), 1);

    Ok(())
}
