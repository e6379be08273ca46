use std::collections::{
    BTreeMap,
    BTreeSet,
};

use history::OpId;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value as JsonValue,
};

use crate::translate::TranslatedHistory;

/// Reported when the checker calls a history invalid without naming why.
pub const UNSPECIFIED_ANOMALY: &str = "unspecified";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Valid,
    Invalid,
    Unknown,
}

/// An operation implicated in an anomaly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WitnessOp {
    pub index: u64,
    pub process: Option<u64>,
    /// The harness operation the record index maps back to.
    pub op_id: Option<OpId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Witness {
    pub operations: Vec<WitnessOp>,
    /// The checker's own description, kept verbatim.
    pub detail: JsonValue,
}

/// Anomaly classes found in a history, each with the operations that
/// witness it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnomalyReport {
    pub validity: Validity,
    pub anomalies: BTreeMap<String, Vec<Witness>>,
    /// Consistency models the history rules out.
    pub ruled_out: Vec<String>,
    pub warnings: Vec<String>,
}

impl AnomalyReport {
    pub fn valid() -> Self {
        Self {
            validity: Validity::Valid,
            anomalies: BTreeMap::new(),
            ruled_out: vec![],
            warnings: vec![],
        }
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn anomaly_types(&self) -> Vec<&str> {
        self.anomalies.keys().map(String::as_str).collect()
    }

    pub fn add_anomaly(&mut self, class: impl Into<String>, witness: Witness) {
        self.anomalies.entry(class.into()).or_default().push(witness);
        self.validity = Validity::Invalid;
    }

    pub fn merge(&mut self, other: AnomalyReport) {
        self.validity = match (self.validity, other.validity) {
            (Validity::Invalid, _) | (_, Validity::Invalid) => Validity::Invalid,
            (Validity::Unknown, _) | (_, Validity::Unknown) => Validity::Unknown,
            _ => Validity::Valid,
        };
        for (class, witnesses) in other.anomalies {
            self.anomalies.entry(class).or_default().extend(witnesses);
        }
        for model in other.ruled_out {
            if !self.ruled_out.contains(&model) {
                self.ruled_out.push(model);
            }
        }
        self.warnings.extend(other.warnings);
    }
}

/// Parses checker stdout, which is either a JSON analysis object or a
/// `<path>\t<true|false|unknown>` summary line.
pub fn parse_checker_output(
    stdout: &str,
    translated: &TranslatedHistory,
) -> anyhow::Result<AnomalyReport> {
    if let Some(analysis) = find_analysis(stdout) {
        return parse_analysis(&analysis, translated);
    }
    if let Some(validity) = parse_summary_line(stdout) {
        let mut report = AnomalyReport::valid();
        match validity {
            Validity::Valid => {},
            Validity::Invalid => report.add_anomaly(
                UNSPECIFIED_ANOMALY,
                Witness {
                    operations: vec![],
                    detail: JsonValue::String(stdout.trim().to_string()),
                },
            ),
            Validity::Unknown => {
                report.validity = Validity::Unknown;
                report
                    .warnings
                    .push("checker could not determine validity".to_string());
            },
        }
        return Ok(report);
    }
    anyhow::bail!("no analysis found in checker output {stdout:?}")
}

fn find_analysis(stdout: &str) -> Option<Map<String, JsonValue>> {
    if let Ok(JsonValue::Object(analysis)) = serde_json::from_str(stdout.trim()) {
        return Some(analysis);
    }
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| match serde_json::from_str(line) {
            Ok(JsonValue::Object(analysis)) => Some(analysis),
            _ => None,
        })
}

fn parse_summary_line(stdout: &str) -> Option<Validity> {
    let line = stdout.lines().rev().find(|line| !line.trim().is_empty())?;
    let (_, verdict) = line.rsplit_once('\t')?;
    match verdict.trim() {
        "true" => Some(Validity::Valid),
        "false" => Some(Validity::Invalid),
        "unknown" => Some(Validity::Unknown),
        _ => None,
    }
}

/// Checker keywords may arrive as `":G1c"` or `"G1c"`.
fn keyword(s: &str) -> String {
    s.trim_start_matches(':').to_string()
}

fn strings(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(keyword)
            .collect(),
        _ => vec![],
    }
}

fn parse_analysis(
    analysis: &Map<String, JsonValue>,
    translated: &TranslatedHistory,
) -> anyhow::Result<AnomalyReport> {
    let validity = match analysis.get("valid?") {
        Some(JsonValue::Bool(true)) => Validity::Valid,
        Some(JsonValue::Bool(false)) => Validity::Invalid,
        Some(JsonValue::String(s)) if keyword(s) == "unknown" => Validity::Unknown,
        other => anyhow::bail!("checker analysis has unrecognized \"valid?\": {other:?}"),
    };

    let mut classes: BTreeMap<String, Vec<Witness>> = strings(analysis.get("anomaly-types"))
        .into_iter()
        .map(|class| (class, vec![]))
        .collect();
    if let Some(JsonValue::Object(anomalies)) = analysis.get("anomalies") {
        for (class, witnesses) in anomalies {
            let entry = classes.entry(keyword(class)).or_default();
            match witnesses {
                JsonValue::Array(items) => {
                    entry.extend(items.iter().map(|w| witness(w, translated)));
                },
                other => entry.push(witness(other, translated)),
            }
        }
    }
    let mut ruled_out = strings(analysis.get("not"));
    for model in strings(analysis.get("also-not")) {
        if !ruled_out.contains(&model) {
            ruled_out.push(model);
        }
    }

    let mut report = AnomalyReport {
        validity,
        anomalies: BTreeMap::new(),
        ruled_out,
        warnings: vec![],
    };
    match validity {
        Validity::Invalid => {
            if classes.is_empty() {
                classes.insert(
                    UNSPECIFIED_ANOMALY.to_string(),
                    vec![Witness {
                        operations: vec![],
                        detail: JsonValue::Object(analysis.clone()),
                    }],
                );
            }
            report.anomalies = classes;
        },
        Validity::Unknown | Validity::Valid if !classes.is_empty() => {
            let names: Vec<_> = classes.keys().cloned().collect();
            report.warnings.push(format!(
                "checker reported {} without ruling the history invalid",
                names.join(", ")
            ));
        },
        Validity::Unknown => report
            .warnings
            .push("checker could not determine validity".to_string()),
        Validity::Valid => {},
    }
    Ok(report)
}

fn witness(detail: &JsonValue, translated: &TranslatedHistory) -> Witness {
    let mut seen = BTreeSet::new();
    let mut operations = vec![];
    collect_ops(detail, translated, &mut seen, &mut operations);
    Witness {
        operations,
        detail: detail.clone(),
    }
}

/// Finds checker operations (objects with an `index` and a `process` or
/// `type`) anywhere inside a witness.
fn collect_ops(
    value: &JsonValue,
    translated: &TranslatedHistory,
    seen: &mut BTreeSet<u64>,
    out: &mut Vec<WitnessOp>,
) {
    match value {
        JsonValue::Object(fields) => {
            let index = fields.get("index").and_then(JsonValue::as_u64);
            let is_op = fields.contains_key("process") || fields.contains_key("type");
            if let (Some(index), true) = (index, is_op) {
                if seen.insert(index) {
                    out.push(WitnessOp {
                        index,
                        process: fields.get("process").and_then(JsonValue::as_u64),
                        op_id: translated.lookup(index).map(|entry| entry.op_id),
                    });
                }
                return;
            }
            for child in fields.values() {
                collect_ops(child, translated, seen, out);
            }
        },
        JsonValue::Array(items) => {
            for child in items {
                collect_ops(child, translated, seen, out);
            }
        },
        _ => {},
    }
}
