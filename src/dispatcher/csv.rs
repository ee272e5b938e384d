//! Plain-file CSV output with the file I/O on a worker thread
//! so that a slow disk does not stall the control cycle.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::sync::mpsc::{channel, Sender};
use std::thread::JoinHandle;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::{fmt_time, Dispatcher};
use crate::controller::ControllerCtx;

enum Msg {
    Row(SystemTime, i64, Vec<f64>),
    Stop,
}

struct Backend {
    tx: Sender<Msg>,
    handle: JoinHandle<()>,
}

/// Writes each dispatch row to `<op_dir>/<op_name>.csv`.
#[derive(Serialize, Deserialize, Default)]
pub struct CsvDispatcher {
    #[serde(skip)]
    backend: Option<Backend>,
}

impl CsvDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[typetag::serde]
impl Dispatcher for CsvDispatcher {
    fn init(&mut self, ctx: &ControllerCtx, names: &[String]) -> Result<(), String> {
        create_dir_all(&ctx.op_dir).map_err(|e| e.to_string())?;
        let path = ctx.op_dir.join(format!("{}.csv", ctx.op_name));
        let file = File::create(&path).map_err(|e| e.to_string())?;
        let mut writer = BufWriter::new(file);

        let mut header = String::from("time,timestamp_ns");
        for name in names {
            header.push(',');
            header.push_str(name);
        }
        writeln!(writer, "{header}").map_err(|e| e.to_string())?;

        let (tx, rx) = channel::<Msg>();
        let handle = std::thread::spawn(move || {
            while let Ok(Msg::Row(time, timestamp_ns, values)) = rx.recv() {
                let mut row = format!("{},{}", fmt_time(time), timestamp_ns);
                for v in &values {
                    row.push(',');
                    row.push_str(&v.to_string());
                }
                if writeln!(writer, "{row}").is_err() {
                    break;
                }
            }
            let _ = writer.flush();
        });

        self.backend = Some(Backend { tx, handle });
        Ok(())
    }

    fn consume(
        &mut self,
        time: SystemTime,
        timestamp_ns: i64,
        values: &[f64],
    ) -> Result<(), String> {
        match &self.backend {
            Some(backend) => backend
                .tx
                .send(Msg::Row(time, timestamp_ns, values.to_vec()))
                .map_err(|_| "CSV writer thread is gone".to_string()),
            None => Err("CSV dispatcher consumed before init".to_string()),
        }
    }

    fn terminate(&mut self) {
        if let Some(backend) = self.backend.take() {
            let _ = backend.tx.send(Msg::Stop);
            let _ = backend.handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let mut ctx = ControllerCtx::default();
        ctx.op_dir = std::env::temp_dir().join("ferrostat_csv_test");
        ctx.op_name = "rows".to_string();

        let mut d = CsvDispatcher::new();
        d.init(&ctx, &["rig.fx".to_string(), "pid_x.y".to_string()])
            .unwrap();
        d.consume(SystemTime::UNIX_EPOCH, 0, &[1.5, -2.0]).unwrap();
        d.consume(SystemTime::UNIX_EPOCH, 500_000, &[2.5, -3.0])
            .unwrap();
        d.terminate();

        let contents =
            std::fs::read_to_string(ctx.op_dir.join("rows.csv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "time,timestamp_ns,rig.fx,pid_x.y");
        assert!(lines[1].ends_with(",0,1.5,-2"));
        assert!(lines[2].ends_with(",500000,2.5,-3"));
    }

    #[test]
    fn consume_before_init_is_an_error() {
        let mut d = CsvDispatcher::new();
        assert!(d.consume(SystemTime::UNIX_EPOCH, 0, &[0.0]).is_err());
    }
}
