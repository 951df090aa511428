//! Survey-tool export. Each question block is a set of columns prefixed `{n}_`; the first data
//! record carries the media URL per question and the second is tool metadata.

use lexi_core::{MediaId, SignSeen};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{decode, reader, Columns, FeedError, FeedParser, ImporterKind};

const ACCEPTED_STATUSES: &[&str] = &["IP Address", "Imported"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub number: String,
    pub media_id: MediaId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyAnswer {
    pub question: String,
    pub sign_seen: SignSeen,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub ordinal: usize,
    pub response_id: String,
    pub first_name: String,
    pub last_name: String,
    pub answers: Vec<SurveyAnswer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedResponse {
    pub ordinal: usize,
    pub response_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyExport {
    pub questions: Vec<SurveyQuestion>,
    pub responses: Vec<SurveyResponse>,
    pub skipped: Vec<SkippedResponse>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SurveyExportParser;

impl FeedParser for SurveyExportParser {
    type Output = SurveyExport;

    fn kind(&self) -> ImporterKind {
        ImporterKind::Survey
    }

    fn parse(&self, bytes: &[u8]) -> Result<Self::Output, FeedError> {
        let question_header =
            Regex::new(r"^(\d+)_Q1_1$").map_err(|err| FeedError::Parse(err.to_string()))?;

        let text = decode(bytes)?;
        let mut rdr = reader(text, false);
        let headers = rdr.headers()?.clone();
        let columns = Columns::new(&headers);
        columns.require(&["Status", "ResponseId"])?;

        let numbers: Vec<String> = headers
            .iter()
            .filter_map(|header| question_header.captures(header.trim()))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect();

        let mut export = SurveyExport::default();
        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            let ordinal = idx + 1;
            match idx {
                0 => {
                    for number in &numbers {
                        let column = answer_column(number);
                        let url = columns.get(&record, &column);
                        let media_id = media_id_from_url(url).ok_or_else(|| FeedError::Validation {
                            row: ordinal,
                            column: column.clone(),
                            message: format!("no media id in {url:?}"),
                        })?;
                        export.questions.push(SurveyQuestion {
                            number: number.clone(),
                            media_id,
                        });
                    }
                }
                1 => continue,
                _ => {
                    let status = columns.owned(&record, "Status");
                    let response_id = columns.owned(&record, "ResponseId");
                    if !ACCEPTED_STATUSES.contains(&status.as_str()) {
                        export.skipped.push(SkippedResponse {
                            ordinal,
                            response_id,
                            status,
                        });
                        continue;
                    }

                    let mut answers = Vec::new();
                    for number in &numbers {
                        let column = answer_column(number);
                        let answer = SignSeen::parse_answer(columns.get(&record, &column))
                            .map_err(|message| FeedError::Validation {
                                row: ordinal,
                                column: column.clone(),
                                message,
                            })?;
                        let Some(sign_seen) = answer else {
                            continue;
                        };
                        let comment_column = format!("{number}_Q2_5_TEXT");
                        let comment = if columns.has(&comment_column) {
                            columns.owned(&record, &comment_column)
                        } else {
                            String::new()
                        };
                        answers.push(SurveyAnswer {
                            question: number.clone(),
                            sign_seen,
                            comment,
                        });
                    }

                    export.responses.push(SurveyResponse {
                        ordinal,
                        response_id,
                        first_name: columns.owned(&record, "RecipientFirstName"),
                        last_name: columns.owned(&record, "RecipientLastName"),
                        answers,
                    });
                }
            }
        }

        if !numbers.is_empty() && export.questions.is_empty() {
            return Err(FeedError::Validation {
                row: 1,
                column: answer_column(&numbers[0]),
                message: "missing the media url record".to_string(),
            });
        }
        Ok(export)
    }
}

fn answer_column(number: &str) -> String {
    format!("{number}_Q1_1")
}

/// URLs look like `{host}/video/signed_url/{token}/{media id}/`.
fn media_id_from_url(url: &str) -> Option<MediaId> {
    let segments: Vec<&str> = url.trim().split('/').collect();
    if segments.len() < 2 {
        return None;
    }
    segments[segments.len() - 2].parse().ok()
}
