use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Final outcome of one transaction external key.
///
/// `attempt` is the state of the latest payment attempt, `-` when the key
/// never needed one; `status` is the status of its latest transaction.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct PaymentSummary {
    pub key: String,
    pub attempt: String,
    pub status: String,
    pub transactions: usize,
}

pub struct SummaryWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SummaryWriter<W> {
    pub fn new(destination: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(destination),
        }
    }

    pub fn write_summaries<I>(&mut self, summaries: I) -> Result<()>
    where
        I: IntoIterator<Item = PaymentSummary>,
    {
        for summary in summaries {
            self.writer.serialize(summary)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
