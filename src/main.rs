use chrono::{Local, NaiveDate, Utc};
use daily_calculator::config::AppConfig;
use daily_calculator::currency::{format_currency, format_percentage};
use daily_calculator::logging::init_logger;
use daily_calculator::{
    DayRecord, FileDocumentStore, JsonFileMirror, MonthKey, PerStep, SaveOutcome, Session, Step,
    StepInput, SyncService, SyncStatus, downloader, loader, parse_date,
};
use log::warn;
use std::io::{self, Write};
use std::time::Instant;

struct Cli {
    session: Session,
    sync: SyncService,
    simulated_today: Option<NaiveDate>,
}

impl Cli {
    fn today(&self) -> NaiveDate {
        self.simulated_today
            .unwrap_or_else(|| Local::now().date_naive())
    }

    fn roll_over(&mut self) -> String {
        let outcome = self.session.check_rollover(self.today(), Utc::now());
        if let Err(e) = self.sync.persist_active_month(&self.session) {
            warn!("could not remember the active month: {}", e);
        }
        match outcome.summary {
            Some(summary) => {
                let status = self.sync.persist_summary(&self.session, &summary);
                println!("{}", downloader::month_report(&summary));
                sync_note("rolled over", &status)
            }
            None if outcome.rollover.rolled_over => "rolled over (empty month)".to_string(),
            None => "ok".to_string(),
        }
    }

    /// Persist the touched days and a refreshed month summary, if any
    fn persist_saved(&self, outcome: &SaveOutcome) -> SyncStatus {
        let mut status = self.sync.persist_days(&self.session, &outcome.touched);
        if let Some(summary) = &outcome.summary {
            status.merge(self.sync.persist_summary(&self.session, summary));
        }
        status
    }

    fn run_command(&mut self, command: &str) -> Result<String, Box<dyn std::error::Error>> {
        let parts: Vec<&str> = command.split_whitespace().collect();
        let today = self.today();

        match parts.as_slice() {
            ["today"] => {
                println!("today is {}", today);
                Ok("ok".to_string())
            }
            ["today", "now"] => {
                self.simulated_today = None;
                self.session.start_active_day(self.today());
                Ok(self.roll_over())
            }
            ["today", date] => {
                let date = parse_date(date)?;
                self.simulated_today = Some(date);
                self.session.start_active_day(date);
                Ok(self.roll_over())
            }
            [step, value1, value2] if Step::from_strng(step).is_some() => {
                let step = Step::from_strng(step).ok_or("unknown step")?;
                let active = self
                    .session
                    .enter_step(step, StepInput::parse(value1, value2), today);
                print_record(&active.preview());
                Ok(format!("{} entered", step.label()))
            }
            ["save"] => {
                let outcome = self.session.save_active_day(today)?;
                let status = self.persist_saved(&outcome);
                print_record(&outcome.record);
                Ok(sync_note(
                    &format!("saved, {} day(s) updated", outcome.touched_count()),
                    &status,
                ))
            }
            ["edit", date, a1, a2, b1, b2] => {
                let date = parse_date(date)?;
                let inputs = PerStep::new(StepInput::parse(a1, a2), StepInput::parse(b1, b2));
                let outcome = self.session.save_day_record(date, inputs, today)?;
                let status = self.persist_saved(&outcome);
                print_record(&outcome.record);
                Ok(sync_note(
                    &format!("saved, {} day(s) updated", outcome.touched_count()),
                    &status,
                ))
            }
            ["show"] => {
                match &self.session.active_day {
                    Some(active) => print_record(&active.preview()),
                    None => println!("no active day"),
                }
                Ok("ok".to_string())
            }
            ["show", date] => {
                let date = parse_date(date)?;
                match self.session.record(date) {
                    Some(record) => {
                        print_record(record);
                        println!("state: {:?}", self.session.day_state(date));
                        Ok("ok".to_string())
                    }
                    None => Ok(format!("no record for {}", date)),
                }
            }
            ["calendar"] => {
                print_calendar(&self.session, MonthKey::from_date(today), today);
                Ok("ok".to_string())
            }
            ["calendar", month] => {
                print_calendar(&self.session, month.parse()?, today);
                Ok("ok".to_string())
            }
            ["months"] => {
                if self.session.months.is_empty() {
                    println!("no consolidated months yet");
                }
                for summary in self.session.months.values().rev() {
                    println!("{}", downloader::month_report(summary));
                }
                Ok("ok".to_string())
            }
            ["rollover"] => Ok(self.roll_over()),
            ["export", "json", path] => {
                std::fs::write(path, downloader::to_json(&self.session, Utc::now())?)?;
                Ok(format!("exported to {}", path))
            }
            ["export", "xlsx", path] => {
                std::fs::write(path, downloader::to_xlsx(&self.session)?)?;
                Ok(format!("exported to {}", path))
            }
            ["export", "csv", path] => {
                std::fs::write(path, downloader::to_csv(&self.session)?)?;
                Ok(format!("exported to {}", path))
            }
            ["import", path] => {
                let imported = loader::from_json_file(path)?;
                let report = self.session.apply_import(imported, today, Utc::now());
                let status = self.sync.persist_all(&self.session);
                Ok(sync_note(
                    &format!(
                        "imported {} day(s), {} month(s), {} repaired",
                        report.day_count,
                        report.month_count,
                        report.repaired.len()
                    ),
                    &status,
                ))
            }
            ["reset", month, confirm] => {
                let month: MonthKey = month.parse()?;
                let removed = self.session.reset_month(month, confirm)?;
                let status = self.sync.delete_days(&self.session, &removed);
                let summary_status = self.sync.delete_summary(&self.session, month);
                let note = format!("removed {} day(s)", removed.len());
                if status.is_ok() && summary_status.is_ok() {
                    Ok(note)
                } else {
                    Ok(format!("{} (not synced)", note))
                }
            }
            _ => Ok("invalid command".to_string()),
        }
    }
}

fn sync_note(message: &str, status: &SyncStatus) -> String {
    if status.is_ok() {
        message.to_string()
    } else {
        format!("{} (not synced)", message)
    }
}

fn print_record(record: &DayRecord) {
    println!("{}", record.date);
    for step in Step::ALL {
        let totals = record.step(step);
        println!(
            "  {}: {} + {} = {} | accumulated {} -> {}",
            step.label(),
            format_currency(totals.value1),
            format_currency(totals.value2),
            format_currency(totals.daily_total),
            format_currency(totals.previous_accumulated),
            format_currency(totals.accumulated),
        );
    }
    println!("  percentage: {}", format_percentage(record.percentage));
}

fn print_calendar(session: &Session, month: MonthKey, today: NaiveDate) {
    println!("{}", month);
    println!(" Sun Mon Tue Wed Thu Fri Sat");
    for week in session.calendar_month(month, today).chunks(7) {
        for cell in week {
            match cell {
                Some(day) if day.is_today => print!(" [{:>2}]", day.day),
                Some(day) if day.has_data => print!(" {:>2}*", day.day),
                Some(day) => print!(" {:>3}", day.day),
                None => print!("    "),
            }
        }
        println!();
    }
}

fn print_help() {
    println!("Commands:");
    println!("  q: Quit");
    println!("  today [YYYY-MM-DD|now]: Show or simulate today's date");
    println!("  step1 <value1> <value2>: Enter Step 1 for the active day");
    println!("  step2 <value1> <value2>: Enter Step 2 for the active day");
    println!("  save: Save the active day and move to the next one");
    println!("  edit <date> <s1v1> <s1v2> <s2v1> <s2v2>: Save or correct any past day");
    println!("  show [date]: Show the active day or a saved day");
    println!("  calendar [YYYY-MM]: Show the month calendar (* = saved)");
    println!("  months: Show consolidated months");
    println!("  rollover: Check for a new month now");
    println!("  export json|xlsx|csv <path>: Export the data");
    println!("  import <path>: Replace the data with a JSON backup");
    println!("  reset <YYYY-MM> <YYYY-MM>: Delete a month (repeat the month to confirm)");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_logger(&config.log_level);

    let durable = FileDocumentStore::open(config.store_path())?;
    let mirror = JsonFileMirror::open(config.mirror_path());
    let sync = SyncService::new(&config.account_id, Box::new(durable), Box::new(mirror));

    let mut session = sync.load()?.into_session();
    let repaired = session.repair_all();
    if !repaired.is_empty() {
        let status = sync.persist_repairs(&session, &repaired);
        if !status.is_ok() {
            warn!("repaired records were not written back: {:?}", status);
        }
    }

    let mut cli = Cli {
        session,
        sync,
        simulated_today: None,
    };
    let mut status = cli.roll_over();

    let mut start_time = Instant::now();
    loop {
        let elapsed_time = start_time.elapsed().as_secs_f64();
        print!("[{:.1}] ({}) > ", elapsed_time, status);
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            break;
        }
        let command = command.trim();

        start_time = Instant::now();

        if command.is_empty() {
            status = String::from("invalid command");
            continue;
        }
        if command == "q" {
            break;
        }
        if command == "help" {
            print_help();
            continue;
        }

        status = match cli.run_command(command) {
            Ok(status) => status,
            Err(e) => e.to_string(),
        };
    }

    Ok(())
}
