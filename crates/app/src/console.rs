//! Line-based terminal front end for one attempt.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

use engine::{AttemptSession, SessionError, TimerEvent};
use quiz_core::model::{AttemptResult, AutosaveSnapshot};

/// Line reader over stdin, shared by every prompt of one run.
pub type Input = Lines<BufReader<Stdin>>;

#[must_use]
pub fn stdin_lines() -> Input {
    BufReader::new(tokio::io::stdin()).lines()
}

enum Next {
    Timer(Option<TimerEvent>),
    Line(Option<String>),
}

enum Action {
    Choose(usize),
    Next,
    Prev,
    Goto(usize),
    Risk,
    Clear,
    Status,
    Submit,
    Quit,
    Help,
}

fn parse_action(line: &str) -> Option<Action> {
    let mut words = line.split_whitespace();
    let action = match words.next()? {
        "n" | "next" => Action::Next,
        "p" | "prev" => Action::Prev,
        "g" | "goto" => Action::Goto(words.next()?.parse().ok()?),
        "r" | "risk" => Action::Risk,
        "c" | "clear" => Action::Clear,
        "s" | "status" => Action::Status,
        "submit" => Action::Submit,
        "q" | "quit" => Action::Quit,
        "h" | "help" | "?" => Action::Help,
        word => Action::Choose(word.parse().ok()?),
    };
    Some(action)
}

fn print_help() {
    println!("  <k>        choose option k");
    println!("  n / p      next / previous question");
    println!("  g <i>      go to question i");
    println!("  r          toggle risk on this question");
    println!("  c          clear this answer");
    println!("  s          show progress");
    println!("  submit     submit the attempt");
    println!("  q          leave and keep progress");
}

fn render(session: &AttemptSession) {
    let s = session.session();
    let index = s.current_index();
    let total = s.total_questions();
    if total == 0 {
        println!("this quiz has no questions; type `submit` to finish");
        return;
    }
    let Some(question) = session.current_question() else {
        println!("[{}/{total}] still loading...", index + 1);
        return;
    };

    let risk = if s.is_risked(question.id) { " (risked)" } else { "" };
    println!();
    println!("[{}/{total}]{risk} {}", index + 1, question.prompt);
    let chosen = s.answer_for(question.id);
    for (k, option) in question.options.iter().enumerate() {
        let mark = if chosen == Some(option.id) { '*' } else { ' ' };
        println!("  {mark} {}. {}", k + 1, option.text);
    }
}

fn print_progress(session: &AttemptSession) {
    let p = session.progress();
    print!(
        "{}: {}/{} answered, {} risked, {} loaded",
        p.state, p.answered, p.total, p.risked, p.loaded
    );
    if let Some(secs) = p.time_remaining_secs {
        print!(", {}", format_clock(secs));
    }
    if p.autosave_failed {
        print!(", autosave failing");
    }
    println!();
}

fn format_clock(secs: u32) -> String {
    format!("{:02}:{:02} left", secs / 60, secs % 60)
}

/// Ask whether to continue a saved attempt. Defaults to yes.
pub async fn ask_resume<R>(session: &AttemptSession, input: &mut Lines<R>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    if let Some(snapshot) = session.recovery_snapshot() {
        println!("found a saved attempt:");
        print_snapshot(snapshot);
    }
    println!("resume it? [Y/n]");
    read_yes(input).await
}

async fn read_yes<R>(input: &mut Lines<R>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let answer = input.next_line().await?.unwrap_or_default();
    Ok(!matches!(answer.trim(), "n" | "N" | "no"))
}

pub fn print_snapshot(snapshot: &AutosaveSnapshot) {
    print!(
        "  attempt {}: {} of {} answered, at question {}",
        snapshot.attempt_id,
        snapshot.answered_count(),
        snapshot.ordered_question_ids.len(),
        snapshot.current_index + 1
    );
    if let Some(secs) = snapshot.time_remaining_secs {
        print!(", {}", format_clock(secs));
    }
    println!(", saved {}", snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

pub fn print_result(result: &AttemptResult) {
    println!(
        "score {}/{} ({:.0}%), {} of {} correct",
        result.score,
        result.max_score,
        result.percentage(),
        result.correct,
        result.total
    );
    if let Some(secs) = result.duration_secs {
        println!("finished in {}m {:02}s", secs / 60, secs % 60);
    }
}

/// Run the attempt until it is submitted or the user leaves.
///
/// Returns the result, or `None` when the user left with progress kept.
///
/// # Errors
///
/// Returns `SessionError` if a submission fails, and I/O errors from stdin.
pub async fn drive<R>(
    session: &mut AttemptSession,
    input: &mut Lines<R>,
) -> Result<Option<AttemptResult>, Box<dyn std::error::Error>>
where
    R: AsyncBufRead + Unpin,
{
    print_help();
    render(session);

    loop {
        let next = tokio::select! {
            event = session.next_timer_event() => Next::Timer(event),
            line = input.next_line() => Next::Line(line?),
        };

        match next {
            Next::Timer(Some(event)) => {
                if let TimerEvent::Tick(secs @ (60 | 10)) = event {
                    println!("{}", format_clock(secs));
                }
                if let Some(result) = session.apply_timer_event(event).await? {
                    println!("time is up, attempt submitted");
                    return Ok(Some(result));
                }
            }
            Next::Timer(None) => {}
            Next::Line(None) => return leave(session).await,
            Next::Line(Some(line)) => {
                let Some(action) = parse_action(&line) else {
                    println!("unknown command, `h` for help");
                    continue;
                };
                match apply(session, action).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Submitted(result)) => return Ok(Some(result)),
                    Ok(Flow::Leave) => return leave(session).await,
                    Err(SessionError::Submission(err)) => {
                        println!("submission failed: {err}");
                        return Err(err.into());
                    }
                    Err(err) => println!("{err}"),
                }
            }
        }
    }
}

enum Flow {
    Continue,
    Submitted(AttemptResult),
    Leave,
}

async fn apply(session: &mut AttemptSession, action: Action) -> Result<Flow, SessionError> {
    let index = session.session().current_index();
    let total = session.session().total_questions();
    let current = session.session().ordered_question_ids().get(index).copied();

    match action {
        Action::Choose(k) => {
            let Some(question) = session.current_question() else {
                println!("question not loaded yet");
                return Ok(Flow::Continue);
            };
            let Some(option) = k.checked_sub(1).and_then(|i| question.options.get(i)) else {
                println!("no option {k}");
                return Ok(Flow::Continue);
            };
            session.select_answer(question.id, option.id)?;
            if index + 1 < total {
                session.navigate(index + 1)?;
            }
            render(session);
        }
        Action::Next => {
            session.navigate((index + 1).min(total.saturating_sub(1)))?;
            render(session);
        }
        Action::Prev => {
            session.navigate(index.saturating_sub(1))?;
            render(session);
        }
        Action::Goto(i) => {
            session.navigate(i.saturating_sub(1))?;
            render(session);
        }
        Action::Risk => {
            if let Some(question) = current {
                let risked = session.toggle_risk(question)?;
                println!("{}", if risked { "risked" } else { "risk removed" });
            }
        }
        Action::Clear => {
            if let Some(question) = current {
                session.clear_answer(question)?;
                render(session);
            }
        }
        Action::Status => print_progress(session),
        Action::Help => print_help(),
        Action::Submit => {
            let p = session.progress();
            if p.unanswered() > 0 {
                println!("submitting with {} unanswered", p.unanswered());
            }
            return session.submit().await.map(Flow::Submitted);
        }
        Action::Quit => return Ok(Flow::Leave),
    }
    Ok(Flow::Continue)
}

async fn leave(
    session: &mut AttemptSession,
) -> Result<Option<AttemptResult>, Box<dyn std::error::Error>> {
    if let Err(err) = session.flush().await {
        println!("could not save progress: {err}");
    }
    session.leave();
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert!(matches!(parse_action("2"), Some(Action::Choose(2))));
        assert!(matches!(parse_action(" g 14 "), Some(Action::Goto(14))));
        assert!(matches!(parse_action("submit"), Some(Action::Submit)));
        assert!(parse_action("g").is_none());
        assert!(parse_action("").is_none());
        assert!(parse_action("jump").is_none());
    }

    #[tokio::test]
    async fn resume_prompt_reads_one_line_from_the_shared_reader() {
        let mut input = BufReader::new(&b"n\nsubmit\n\n"[..]).lines();

        assert!(!read_yes(&mut input).await.unwrap());
        assert_eq!(input.next_line().await.unwrap().as_deref(), Some("submit"));
        assert!(read_yes(&mut input).await.unwrap());
        assert!(read_yes(&mut input).await.unwrap());
    }

    #[test]
    fn formats_remaining_time() {
        assert_eq!(format_clock(605), "10:05 left");
        assert_eq!(format_clock(9), "00:09 left");
    }
}
