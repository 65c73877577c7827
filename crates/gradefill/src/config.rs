use std::time::Duration;

use camino::Utf8Path;
use gradefill_core::stop::DEFAULT_STOP_LABEL;
use gradefill_core::IteratorConfig;
use kdl::KdlDocument;
use kdl::KdlNode;
use miette::Context;
use miette::LabeledSpan;

/// Name of the configuration file looked up in the store root.
pub(crate) const CONFIG_FILE: &str = "gradefill.kdl";

/// Values from a `gradefill.kdl` file. Missing values fall back to the
/// defaults of [`IteratorConfig`].
///
/// ```kdl
/// settle_interval_ms 1000
/// stop_label "Update"
/// fields {
///     name "Name"
///     level "Grade level"
///     subjects "Subjects"
/// }
/// ```
#[derive(Debug, Default)]
pub struct Config {
    pub(crate) settle_interval: Option<Duration>,
    pub(crate) stop_label: Option<String>,
    pub(crate) name_field: Option<String>,
    pub(crate) level_field: Option<String>,
    pub(crate) subjects_field: Option<String>,
}

impl Config {
    pub(crate) fn iterator_config(&self) -> IteratorConfig {
        let defaults = IteratorConfig::default();
        IteratorConfig {
            name_field: self.name_field.clone().unwrap_or(defaults.name_field),
            level_field: self.level_field.clone().unwrap_or(defaults.level_field),
            subjects_field: self.subjects_field.clone().unwrap_or(defaults.subjects_field),
            settle_interval: self.settle_interval.unwrap_or(defaults.settle_interval),
        }
    }

    pub(crate) fn stop_label(&self) -> &str {
        self.stop_label.as_deref().unwrap_or(DEFAULT_STOP_LABEL)
    }
}

fn string_arg(node: &KdlNode, expected: &str) -> miette::Result<String> {
    node.get(0)
        .and_then(|v| v.as_string().map(String::from))
        .ok_or_else(|| {
            miette::diagnostic!(
                labels = vec![LabeledSpan::new_primary_with_span(None, node.span())],
                "{} is expected to be {expected}",
                node.name().value()
            )
            .into()
        })
}

pub(crate) fn parse_config_str(data: &str) -> miette::Result<Config> {
    let doc: KdlDocument = data.parse()?;

    let mut config = Config::default();
    let mut fields_span = None;

    for node in doc.nodes() {
        match node.name().value() {
            "settle_interval_ms" => {
                let millis = node
                    .get(0)
                    .and_then(|v| v.as_integer())
                    .and_then(|v| u64::try_from(v).ok())
                    .ok_or_else(|| {
                        miette::diagnostic!(
                            labels = vec![LabeledSpan::new_primary_with_span(None, node.span())],
                            help = "Use 0 to write both fields without waiting.",
                            "settle_interval_ms is expected to be a non-negative integer"
                        )
                    })?;
                config.settle_interval = Some(Duration::from_millis(millis));
            }
            "stop_label" => config.stop_label = Some(string_arg(node, "a string")?),
            "fields" => {
                fields_span = Some(node.span());
                for field in node.iter_children() {
                    let slot = match field.name().value() {
                        "name" => &mut config.name_field,
                        "level" => &mut config.level_field,
                        "subjects" => &mut config.subjects_field,
                        unknown => {
                            return Err(miette::diagnostic!(
                                labels = vec![LabeledSpan::new_primary_with_span(
                                    Some(String::from("here")),
                                    field.name().span()
                                )],
                                help = "Allowed fields are: \"name\", \"level\", \"subjects\"",
                                "Unknown field \"{unknown}\"."
                            ))?
                        }
                    };
                    *slot = Some(string_arg(field, "a field name")?);
                }
            }
            unknown => {
                return Err(miette::diagnostic!(
                    labels = vec![LabeledSpan::new_primary_with_span(
                        Some(String::from("here")),
                        node.name().span()
                    )],
                    help = "Allowed nodes are: \"settle_interval_ms\", \"stop_label\", \"fields\"",
                    "Unknown node \"{unknown}\"."
                ))?
            }
        }
    }

    if let Err(e) = config.iterator_config().validate() {
        return Err(miette::diagnostic!(
            labels = fields_span
                .map(|span| LabeledSpan::new_primary_with_span(Some(e.to_string()), span))
                .into_iter()
                .collect::<Vec<_>>(),
            help = "The name, level and subjects fields need three different names.",
            "A record field would be written over."
        ))?;
    }

    Ok(config)
}

pub(crate) async fn parse_config(path: &Utf8Path) -> miette::Result<Config> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| miette::miette!(e))
        .wrap_err_with(|| miette::miette!("Could not read configuration at \"{path}\""))?;

    parse_config_str(&data).map_err(|e| e.with_source_code(data))
}
