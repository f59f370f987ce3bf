//! The `mastery tutor` command: an interactive session on stdin.

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use mastery_core::controller::OutputEvent;
use mastery_core::parser::parse_lesson_with_defaults;
use mastery_core::SessionId;

use super::{build_service, print_event, EngineArgs};

pub async fn execute(lesson_path: PathBuf, args: EngineArgs) -> Result<()> {
    let (config, service) = build_service(&args).await?;
    let lesson = parse_lesson_with_defaults(&lesson_path, &config.mastery)?;

    let (state, mut event) = service.start_assessment(&lesson).await?;
    let id = state.id;
    if !args.json {
        println!("Session: {id}");
        println!("Lesson: {}. Type `quit` to stop.\n", lesson.title);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_event(&id, &event, args.json)?;

        let continuing = matches!(
            event,
            OutputEvent::Feedback {
                next_question: None,
                ..
            }
        );
        let next = match &event {
            OutputEvent::Completed { .. } => break,
            _ if continuing => service.continue_session(&id).await,
            _ => {
                let Some(answer) = prompt(&mut lines, "> ", args.json).await? else {
                    saved(&id, "answer", args.json);
                    break;
                };
                service.submit_answer(&id, &answer).await
            }
        };

        match next {
            Ok((_, e)) => event = e,
            Err(e) if e.code().is_retryable() => {
                eprintln!("Error [{}]: {e}", e.code());
                // wait for the learner before asking the generator again
                if continuing {
                    let hint = "Press Enter to retry, or type `quit` to stop. ";
                    if prompt(&mut lines, hint, args.json).await?.is_none() {
                        saved(&id, "continue", args.json);
                        break;
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
        if !args.json {
            println!();
        }
    }

    Ok(())
}

/// Read one line, or `None` on EOF or `quit`.
async fn prompt<R>(lines: &mut Lines<R>, hint: &str, json: bool) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    if !json {
        print!("{hint}");
        std::io::stdout().flush()?;
    }
    Ok(lines
        .next_line()
        .await?
        .filter(|line| line.trim() != "quit"))
}

fn saved(id: &SessionId, resume: &str, json: bool) {
    if !json {
        println!("\nSession saved. Resume with `mastery {resume} --session {id}`.");
    }
}
