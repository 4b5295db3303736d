#![allow(dead_code)]

use anyhow::Context;
use conveyor::{Builder, ConveyorBuilder, ConveyorConfig};

#[derive(Debug, Default)]
pub struct Person {
    pub first: Option<String>,
    pub last: Option<String>,
    pub year: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    First,
    Last,
    Year,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub first: String,
    pub last: String,
    pub year: Option<u32>,
}

impl Person {
    pub fn fields(&self) -> usize {
        usize::from(self.first.is_some())
            + usize::from(self.last.is_some())
            + usize::from(self.year.is_some())
    }
}

impl Builder<u32, Field, String> for Person {
    type Product = Record;

    fn build(&mut self) -> anyhow::Result<Record> {
        Ok(Record {
            first: self.first.clone().context("first name missing")?,
            last: self.last.clone().context("last name missing")?,
            year: self.year,
        })
    }
}

pub fn dispatch(label: &Field, value: String, p: &mut Person) -> anyhow::Result<()> {
    match label {
        Field::First => p.first = Some(value),
        Field::Last => p.last = Some(value),
        Field::Year => p.year = Some(value.parse()?),
    }
    Ok(())
}

pub fn complete(p: &Person) -> bool {
    p.fields() == 3
}

/// Person conveyor: default supplier, dispatcher and all-fields readiness.
pub fn people(cfg: ConveyorConfig) -> ConveyorBuilder<u32, Field, String, Person> {
    ConveyorBuilder::new(cfg)
        .with_supplier(Person::default)
        .with_dispatcher(dispatch)
        .with_builder_readiness(complete)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
