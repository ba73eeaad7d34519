//! Prometheus text exposition format
//!
//! Encoding and decoding of metric family batches in the text format used by
//! federation endpoints: `# HELP`/`# TYPE` headers followed by one line per
//! sample with the label set in `{name="value",...}` form, an optional value
//! and a millisecond timestamp. Histogram and summary families round-trip
//! through their `_bucket`/`_sum`/`_count` (and `quantile`) line groups.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use thiserror::Error;

use super::model::{
    HistogramBucket, HistogramValue, LabelSet, MetricFamily, MetricType, Sample, SampleValue,
    SummaryQuantile, SummaryValue,
};

/// Content type of the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("line {line}: malformed sample line")]
    InvalidLine { line: usize },
    #[error("line {line}: invalid metric value {value:?}")]
    InvalidValue { line: usize, value: String },
    #[error("line {line}: invalid timestamp {value:?}")]
    InvalidTimestamp { line: usize, value: String },
    #[error("line {line}: duplicate label name {name:?}")]
    DuplicateLabel { line: usize, name: String },
    #[error("line {line}: invalid escape sequence")]
    InvalidEscape { line: usize },
    #[error("line {line}: unknown metric type {value:?}")]
    UnknownType { line: usize, value: String },
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a batch of metric families in exposition text format.
pub fn encode(families: &[MetricFamily]) -> String {
    let mut out = String::new();
    for family in families {
        encode_family(&mut out, family);
    }
    out
}

fn encode_family(out: &mut String, family: &MetricFamily) {
    if !family.help.is_empty() {
        let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(&family.help));
    }
    let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind);

    for sample in &family.samples {
        match &sample.value {
            SampleValue::Value(v) => {
                write_line(
                    out,
                    &family.name,
                    &sample.labels,
                    None,
                    *v,
                    sample.timestamp_ms,
                );
            }
            SampleValue::Histogram(h) => {
                let bucket_name = format!("{}_bucket", family.name);
                for bucket in &h.buckets {
                    write_line(
                        out,
                        &bucket_name,
                        &sample.labels,
                        Some(("le", format_value(bucket.upper_bound))),
                        bucket.cumulative,
                        sample.timestamp_ms,
                    );
                }
                let sum_name = format!("{}_sum", family.name);
                write_line(out, &sum_name, &sample.labels, None, h.sum, sample.timestamp_ms);
                let count_name = format!("{}_count", family.name);
                write_line(
                    out,
                    &count_name,
                    &sample.labels,
                    None,
                    h.count,
                    sample.timestamp_ms,
                );
            }
            SampleValue::Summary(s) => {
                for q in &s.quantiles {
                    write_line(
                        out,
                        &family.name,
                        &sample.labels,
                        Some(("quantile", format_value(q.quantile))),
                        q.value,
                        sample.timestamp_ms,
                    );
                }
                let sum_name = format!("{}_sum", family.name);
                write_line(out, &sum_name, &sample.labels, None, s.sum, sample.timestamp_ms);
                let count_name = format!("{}_count", family.name);
                write_line(
                    out,
                    &count_name,
                    &sample.labels,
                    None,
                    s.count,
                    sample.timestamp_ms,
                );
            }
        }
    }
}

fn write_line(
    out: &mut String,
    name: &str,
    labels: &LabelSet,
    extra: Option<(&str, String)>,
    value: f64,
    timestamp_ms: Option<i64>,
) {
    out.push_str(name);
    if !labels.is_empty() || extra.is_some() {
        out.push('{');
        let mut first = true;
        for (k, v) in labels {
            if !first {
                out.push(',');
            }
            first = false;
            let _ = write!(out, "{}=\"{}\"", k, escape_label_value(v));
        }
        if let Some((k, v)) = extra {
            if !first {
                out.push(',');
            }
            let _ = write!(out, "{}=\"{}\"", k, escape_label_value(&v));
        }
        out.push('}');
    }
    let _ = write!(out, " {}", format_value(value));
    if let Some(ts) = timestamp_ms {
        let _ = write!(out, " {}", ts);
    }
    out.push('\n');
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{}", v)
    }
}

fn escape_help(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse an exposition text payload into metric families.
///
/// Families come out in first-seen order. Histogram and summary component
/// lines are regrouped into structured samples keyed by their label set
/// (minus the `le`/`quantile` label).
pub fn parse(text: &str) -> Result<Vec<MetricFamily>, ParseError> {
    let mut parser = Parser::default();
    for (idx, raw) in text.lines().enumerate() {
        parser.line(idx + 1, raw)?;
    }
    Ok(parser.finish())
}

#[derive(Default)]
struct Parser {
    families: Vec<FamilyBuilder>,
    index: HashMap<String, usize>,
}

struct FamilyBuilder {
    family: MetricFamily,
    complex: BTreeMap<LabelSet, ComplexAccum>,
}

#[derive(Default)]
struct ComplexAccum {
    sum: Option<f64>,
    count: Option<f64>,
    buckets: Vec<HistogramBucket>,
    quantiles: Vec<SummaryQuantile>,
    timestamp_ms: Option<i64>,
}

#[derive(Clone, Copy, PartialEq)]
enum Component {
    Bucket,
    Sum,
    Count,
}

impl Parser {
    fn line(&mut self, line_no: usize, raw: &str) -> Result<(), ParseError> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix('#') {
            return self.comment_line(line_no, rest.trim_start());
        }
        let (name, labels, value, timestamp_ms) = parse_sample_line(line_no, line)?;
        self.ingest(line_no, name, labels, value, timestamp_ms)
    }

    fn comment_line(&mut self, line_no: usize, rest: &str) -> Result<(), ParseError> {
        if let Some(decl) = rest.strip_prefix("HELP ") {
            let mut parts = decl.splitn(2, ' ');
            if let Some(name) = parts.next() {
                let help = unescape_help(parts.next().unwrap_or(""));
                self.family_mut(name).family.help = help;
            }
        } else if let Some(decl) = rest.strip_prefix("TYPE ") {
            let mut parts = decl.split_whitespace();
            if let (Some(name), Some(kind_str)) = (parts.next(), parts.next()) {
                let kind = MetricType::parse(kind_str).ok_or_else(|| ParseError::UnknownType {
                    line: line_no,
                    value: kind_str.to_string(),
                })?;
                self.family_mut(name).family.kind = kind;
            }
        }
        // other comments are ignored
        Ok(())
    }

    fn family_mut(&mut self, name: &str) -> &mut FamilyBuilder {
        if let Some(&idx) = self.index.get(name) {
            return &mut self.families[idx];
        }
        self.index.insert(name.to_string(), self.families.len());
        self.families.push(FamilyBuilder {
            family: MetricFamily::new(name, MetricType::Untyped),
            complex: BTreeMap::new(),
        });
        self.families.last_mut().unwrap()
    }

    fn ingest(
        &mut self,
        line_no: usize,
        name: String,
        labels: LabelSet,
        value: f64,
        timestamp_ms: Option<i64>,
    ) -> Result<(), ParseError> {
        if let Some((idx, component)) = self.complex_target(&name) {
            return self.ingest_complex(idx, component, line_no, labels, value, timestamp_ms);
        }
        if let Some(&idx) = self.index.get(&name)
            && self.families[idx].family.kind == MetricType::Summary
        {
            return self.ingest_quantile(idx, line_no, labels, value, timestamp_ms);
        }
        self.family_mut(&name).family.samples.push(Sample {
            labels,
            value: SampleValue::Value(value),
            timestamp_ms,
        });
        Ok(())
    }

    /// Resolve `<base>_bucket`/`_sum`/`_count` lines to a previously declared
    /// histogram or summary family.
    fn complex_target(&self, name: &str) -> Option<(usize, Component)> {
        for (suffix, component) in [
            ("_bucket", Component::Bucket),
            ("_sum", Component::Sum),
            ("_count", Component::Count),
        ] {
            if let Some(base) = name.strip_suffix(suffix)
                && let Some(&idx) = self.index.get(base)
            {
                let matches = match self.families[idx].family.kind {
                    MetricType::Histogram => true,
                    MetricType::Summary => component != Component::Bucket,
                    _ => false,
                };
                if matches {
                    return Some((idx, component));
                }
            }
        }
        None
    }

    fn ingest_complex(
        &mut self,
        idx: usize,
        component: Component,
        line_no: usize,
        mut labels: LabelSet,
        value: f64,
        timestamp_ms: Option<i64>,
    ) -> Result<(), ParseError> {
        let upper_bound = if component == Component::Bucket {
            let le = labels
                .remove("le")
                .ok_or(ParseError::InvalidLine { line: line_no })?;
            Some(parse_value(&le).ok_or_else(|| ParseError::InvalidValue {
                line: line_no,
                value: le.clone(),
            })?)
        } else {
            None
        };

        let accum = self.families[idx].complex.entry(labels).or_default();
        match component {
            Component::Bucket => accum.buckets.push(HistogramBucket {
                upper_bound: upper_bound.unwrap_or(f64::INFINITY),
                cumulative: value,
            }),
            Component::Sum => accum.sum = Some(value),
            Component::Count => accum.count = Some(value),
        }
        if timestamp_ms.is_some() {
            accum.timestamp_ms = timestamp_ms;
        }
        Ok(())
    }

    fn ingest_quantile(
        &mut self,
        idx: usize,
        line_no: usize,
        mut labels: LabelSet,
        value: f64,
        timestamp_ms: Option<i64>,
    ) -> Result<(), ParseError> {
        let quantile = labels
            .remove("quantile")
            .ok_or(ParseError::InvalidLine { line: line_no })?;
        let quantile = parse_value(&quantile).ok_or_else(|| ParseError::InvalidValue {
            line: line_no,
            value: quantile.clone(),
        })?;

        let accum = self.families[idx].complex.entry(labels).or_default();
        accum.quantiles.push(SummaryQuantile { quantile, value });
        if timestamp_ms.is_some() {
            accum.timestamp_ms = timestamp_ms;
        }
        Ok(())
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.families.into_iter().map(FamilyBuilder::build).collect()
    }
}

impl FamilyBuilder {
    fn build(mut self) -> MetricFamily {
        match self.family.kind {
            MetricType::Histogram => {
                for (labels, accum) in self.complex {
                    let mut buckets = accum.buckets;
                    buckets.sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));
                    self.family.samples.push(Sample {
                        labels,
                        value: SampleValue::Histogram(HistogramValue {
                            sum: accum.sum.unwrap_or(0.0),
                            count: accum.count.unwrap_or(0.0),
                            buckets,
                        }),
                        timestamp_ms: accum.timestamp_ms,
                    });
                }
            }
            MetricType::Summary => {
                for (labels, accum) in self.complex {
                    let mut quantiles = accum.quantiles;
                    quantiles.sort_by(|a, b| a.quantile.total_cmp(&b.quantile));
                    self.family.samples.push(Sample {
                        labels,
                        value: SampleValue::Summary(SummaryValue {
                            sum: accum.sum.unwrap_or(0.0),
                            count: accum.count.unwrap_or(0.0),
                            quantiles,
                        }),
                        timestamp_ms: accum.timestamp_ms,
                    });
                }
            }
            _ => {}
        }
        self.family
    }
}

fn parse_sample_line(
    line_no: usize,
    line: &str,
) -> Result<(String, LabelSet, f64, Option<i64>), ParseError> {
    let name_end = line
        .bytes()
        .position(|b| !(b.is_ascii_alphanumeric() || b == b'_' || b == b':'))
        .unwrap_or(line.len());
    if name_end == 0 {
        return Err(ParseError::InvalidLine { line: line_no });
    }
    let name = line[..name_end].to_string();

    let mut rest = line[name_end..].trim_start();
    let mut labels = LabelSet::new();
    if rest.starts_with('{') {
        let (parsed, remainder) = parse_labels(line_no, rest)?;
        labels = parsed;
        rest = remainder.trim_start();
    }

    let mut parts = rest.split_whitespace();
    let value_tok = parts
        .next()
        .ok_or(ParseError::InvalidLine { line: line_no })?;
    let value = parse_value(value_tok).ok_or_else(|| ParseError::InvalidValue {
        line: line_no,
        value: value_tok.to_string(),
    })?;
    let timestamp_ms = match parts.next() {
        Some(tok) => Some(tok.parse::<i64>().map_err(|_| ParseError::InvalidTimestamp {
            line: line_no,
            value: tok.to_string(),
        })?),
        None => None,
    };
    if parts.next().is_some() {
        return Err(ParseError::InvalidLine { line: line_no });
    }

    Ok((name, labels, value, timestamp_ms))
}

/// Parse a `{name="value",...}` block. Returns the labels and the remainder
/// of the line after the closing brace.
fn parse_labels<'a>(line_no: usize, s: &'a str) -> Result<(LabelSet, &'a str), ParseError> {
    let bytes = s.as_bytes();
    let mut labels = LabelSet::new();
    let mut i = 1; // past '{'

    loop {
        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(ParseError::InvalidLine { line: line_no });
        }
        if bytes[i] == b'}' {
            return Ok((labels, &s[i + 1..]));
        }

        let name_start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            i += 1;
        }
        if i == name_start {
            return Err(ParseError::InvalidLine { line: line_no });
        }
        let label_name = &s[name_start..i];

        if bytes.get(i) != Some(&b'=') {
            return Err(ParseError::InvalidLine { line: line_no });
        }
        i += 1;
        if bytes.get(i) != Some(&b'"') {
            return Err(ParseError::InvalidLine { line: line_no });
        }
        i += 1;

        let mut value = String::new();
        loop {
            match bytes.get(i) {
                None => return Err(ParseError::InvalidLine { line: line_no }),
                Some(b'"') => {
                    i += 1;
                    break;
                }
                Some(b'\\') => {
                    i += 1;
                    match bytes.get(i) {
                        Some(b'\\') => value.push('\\'),
                        Some(b'"') => value.push('"'),
                        Some(b'n') => value.push('\n'),
                        _ => return Err(ParseError::InvalidEscape { line: line_no }),
                    }
                    i += 1;
                }
                Some(_) => {
                    // take the full (possibly multi-byte) character
                    let ch = s[i..].chars().next().unwrap();
                    value.push(ch);
                    i += ch.len_utf8();
                }
            }
        }

        if labels.insert(label_name.to_string(), value).is_some() {
            return Err(ParseError::DuplicateLabel {
                line: line_no,
                name: label_name.to_string(),
            });
        }

        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        match bytes.get(i) {
            Some(b',') => i += 1,
            Some(b'}') => return Ok((labels, &s[i + 1..])),
            _ => return Err(ParseError::InvalidLine { line: line_no }),
        }
    }
}

fn parse_value(tok: &str) -> Option<f64> {
    match tok {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => tok.parse::<f64>().ok(),
    }
}

fn unescape_help(s: &str) -> String {
    s.replace("\\n", "\n").replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metricset::model::label_set;

    fn gauge(name: &str, samples: Vec<Sample>) -> MetricFamily {
        MetricFamily {
            name: name.to_string(),
            help: String::new(),
            kind: MetricType::Gauge,
            samples,
        }
    }

    #[test]
    fn test_encode_plain_sample() {
        let family = gauge(
            "up",
            vec![
                Sample::new(label_set(&[("job", "a")]), SampleValue::Value(1.0))
                    .with_timestamp(1700000000000),
            ],
        );
        assert_eq!(
            encode(&[family]),
            "# TYPE up gauge\nup{job=\"a\"} 1 1700000000000\n"
        );
    }

    #[test]
    fn test_encode_without_labels_or_timestamp() {
        let family = gauge("up", vec![Sample::new(LabelSet::new(), SampleValue::Value(0.5))]);
        assert_eq!(encode(&[family]), "# TYPE up gauge\nup 0.5\n");
    }

    #[test]
    fn test_encode_help_is_escaped() {
        let mut family = gauge("up", vec![]);
        family.help = "first\nsecond \\ done".to_string();
        assert_eq!(
            encode(&[family]),
            "# HELP up first\\nsecond \\\\ done\n# TYPE up gauge\n"
        );
    }

    #[test]
    fn test_parse_plain_samples() {
        let text = "\
# HELP up Scrape status.
# TYPE up gauge
up{job=\"a\"} 1 1700000000000
up{job=\"b\"} 0
";
        let families = parse(text).unwrap();
        assert_eq!(families.len(), 1);
        let up = &families[0];
        assert_eq!(up.name, "up");
        assert_eq!(up.help, "Scrape status.");
        assert_eq!(up.kind, MetricType::Gauge);
        assert_eq!(up.samples.len(), 2);
        assert_eq!(up.samples[0].timestamp_ms, Some(1700000000000));
        assert_eq!(up.samples[1].timestamp_ms, None);
    }

    #[test]
    fn test_parse_untyped_without_headers() {
        let families = parse("requests_total 42\n").unwrap();
        assert_eq!(families[0].kind, MetricType::Untyped);
        assert_eq!(families[0].samples[0].value, SampleValue::Value(42.0));
    }

    #[test]
    fn test_parse_special_values() {
        let text = "x_pos +Inf\nx_neg -Inf\nx_nan NaN\n";
        let families = parse(text).unwrap();
        assert_eq!(families[0].samples[0].value, SampleValue::Value(f64::INFINITY));
        assert_eq!(
            families[1].samples[0].value,
            SampleValue::Value(f64::NEG_INFINITY)
        );
        match families[2].samples[0].value {
            SampleValue::Value(v) => assert!(v.is_nan()),
            _ => panic!("expected plain value"),
        }
    }

    #[test]
    fn test_parse_escaped_label_values() {
        let text = "m{path=\"a\\\\b\",msg=\"say \\\"hi\\\"\\n\"} 1\n";
        let families = parse(text).unwrap();
        let labels = &families[0].samples[0].labels;
        assert_eq!(labels["path"], "a\\b");
        assert_eq!(labels["msg"], "say \"hi\"\n");
    }

    #[test]
    fn test_parse_rejects_duplicate_label() {
        let err = parse("m{a=\"1\",a=\"2\"} 1\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::DuplicateLabel {
                line: 1,
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_value() {
        let err = parse("m{a=\"1\"} notanumber\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { line: 1, .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let err = parse("# TYPE m wiggle\n").unwrap_err();
        assert!(matches!(err, ParseError::UnknownType { line: 1, .. }));
    }

    #[test]
    fn test_parse_histogram_groups_components() {
        let text = "\
# TYPE req_seconds histogram
req_seconds_bucket{job=\"a\",le=\"0.1\"} 2
req_seconds_bucket{job=\"a\",le=\"+Inf\"} 5
req_seconds_sum{job=\"a\"} 1.25
req_seconds_count{job=\"a\"} 5
";
        let families = parse(text).unwrap();
        assert_eq!(families.len(), 1);
        let sample = &families[0].samples[0];
        assert_eq!(sample.labels, label_set(&[("job", "a")]));
        match &sample.value {
            SampleValue::Histogram(h) => {
                assert_eq!(h.sum, 1.25);
                assert_eq!(h.count, 5.0);
                assert_eq!(h.buckets.len(), 2);
                assert_eq!(h.buckets[0].upper_bound, 0.1);
                assert_eq!(h.buckets[1].upper_bound, f64::INFINITY);
                assert_eq!(h.buckets[1].cumulative, 5.0);
            }
            other => panic!("expected histogram, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_summary_groups_quantiles() {
        let text = "\
# TYPE rpc_seconds summary
rpc_seconds{quantile=\"0.5\"} 0.2
rpc_seconds{quantile=\"0.99\"} 0.9
rpc_seconds_sum 10
rpc_seconds_count 40
";
        let families = parse(text).unwrap();
        let sample = &families[0].samples[0];
        assert!(sample.labels.is_empty());
        match &sample.value {
            SampleValue::Summary(s) => {
                assert_eq!(s.sum, 10.0);
                assert_eq!(s.count, 40.0);
                assert_eq!(s.quantiles.len(), 2);
                assert_eq!(s.quantiles[0].quantile, 0.5);
            }
            other => panic!("expected summary, got {:?}", other),
        }
    }

    #[test]
    fn test_histogram_roundtrip() {
        let text = "\
# TYPE req_seconds histogram
req_seconds_bucket{job=\"a\",le=\"0.1\"} 2 1700000000000
req_seconds_bucket{job=\"a\",le=\"+Inf\"} 5 1700000000000
req_seconds_sum{job=\"a\"} 1.25 1700000000000
req_seconds_count{job=\"a\"} 5 1700000000000
";
        let families = parse(text).unwrap();
        assert_eq!(encode(&families), text);
    }

    #[test]
    fn test_plain_roundtrip() {
        let text = "\
# HELP up Scrape status.
# TYPE up gauge
up{job=\"a\"} 1 1700000000000
up{job=\"b\"} 0 1700000000000
";
        let families = parse(text).unwrap();
        assert_eq!(encode(&families), text);
    }

    #[test]
    fn test_blank_lines_and_comments_ignored() {
        let text = "\n# just a comment\nup 1\n\n";
        let families = parse(text).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].samples.len(), 1);
    }
}
