//! HTML parsers for FPDS ezsearch pages
//!
//! This module handles:
//! - Search result pages: one `RawRecord` per `resultbox` table
//! - The result heading, which carries the total match count
//! - Detail pages: label/value pairs spread over inputs, selects and display cells

use crate::extract::{DetailMap, DetailReference, RawRecord};
use crate::{ExtractError, ExtractResult};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

/// Text identifying the heading row that holds the result count
const RESULTS_HEADING: &str = "List Of Contract Actions Matching Your Criteria";

/// Marker preceding the query string of a detail link
const VIEW_LINK_MARKER: &str = "viewLinkController.jsp?";

/// Date-format hints appended to some detail labels
const DATE_HINTS: [&str; 4] = ["(mm/dd/yyyy)", "mm/dd/yyyy", "(mmddyyyy)", "mmddyyyy"];

fn css(selector: &str) -> ExtractResult<Selector> {
    Selector::parse(selector)
        .map_err(|_| ExtractError::Parse(format!("invalid built-in selector '{}'", selector)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Normalises a page label into a record key
///
/// Date-format hints and punctuation are dropped, whitespace runs become `_`
/// and the result is lower-cased. An empty result becomes `"field"`.
///
/// ```
/// use fpds_harvester::extract::clean_field_name;
///
/// assert_eq!(clean_field_name("Date Signed (mm/dd/yyyy):"), "date_signed");
/// assert_eq!(clean_field_name("Award ID:"), "award_id");
/// assert_eq!(clean_field_name("$$"), "field");
/// ```
pub fn clean_field_name(label: &str) -> String {
    let mut lowered = label.to_lowercase();
    for hint in DATE_HINTS {
        while let Some(index) = lowered.find(hint) {
            let start = lowered[..index].trim_end().len();
            lowered.replace_range(start..index + hint.len(), "");
        }
    }

    let kept: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    let cleaned = kept.split_whitespace().collect::<Vec<_>>().join("_");
    if cleaned.is_empty() {
        "field".to_string()
    } else {
        cleaned
    }
}

/// Extracts the summary records from a search result page
///
/// # Arguments
///
/// * `html` - The page body
/// * `page` - Zero-based page index, stamped onto every record
///
/// # Returns
///
/// One record per `table.resultbox1` / `table.resultbox2`, in page order. A
/// page with no result tables yields an empty list.
pub fn parse_search_page(html: &str, page: u64) -> ExtractResult<Vec<RawRecord>> {
    let document = Html::parse_document(html);
    let table_selector = css("table.resultbox1, table.resultbox2")?;
    let row_selector = css("tr")?;
    let cell_selector = css("td")?;
    let view_selector = css("a[title=\"View\"]")?;

    let mut records = Vec::new();
    for (position, table) in document.select(&table_selector).enumerate() {
        let mut record = RawRecord::new(page, position);

        for row in table.select(&row_selector) {
            let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
            let pairs: &[ElementRef<'_>] = match cells.len() {
                2 | 3 => &cells[..2],
                n if n >= 4 => &cells[..4],
                _ => continue,
            };

            for pair in pairs.chunks_exact(2) {
                let name = clean_field_name(&text_of(pair[0]).replace(':', ""));
                record.fields.insert(name, text_of(pair[1]));
            }
        }

        record.detail_ref = table
            .select(&view_selector)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(parse_view_link);

        records.push(record);
    }

    Ok(records)
}

/// Pulls the detail-page query parameters out of a View link's `href`
///
/// The link is usually a `javascript:` call wrapping
/// `viewLinkController.jsp?...` in single quotes.
pub fn parse_view_link(href: &str) -> Option<DetailReference> {
    let start = href.find(VIEW_LINK_MARKER)? + VIEW_LINK_MARKER.len();
    let rest = &href[start..];
    let query = rest.split('\'').next().unwrap_or(rest);

    let params: DetailReference = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    if params.is_empty() {
        None
    } else {
        Some(params)
    }
}

/// Reads the total match count from the results heading
///
/// The count is the third bold number in the heading row's second cell
/// (`Results <b>1</b> - <b>30</b> of <b>16,366</b>`). Returns `None` when the
/// heading is missing or unreadable.
pub fn parse_total_count(html: &str) -> Option<u64> {
    let document = Html::parse_document(html);
    let heading_selector = Selector::parse("span.results_heading").ok()?;
    let cell_selector = Selector::parse("td").ok()?;
    let bold_selector = Selector::parse("b").ok()?;

    let heading = document
        .select(&heading_selector)
        .find(|span| text_of(*span).contains(RESULTS_HEADING))?;

    let row = heading
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|element| element.value().name() == "tr")?;

    let results_cell = row.select(&cell_selector).nth(1)?;
    let total = results_cell.select(&bold_selector).nth(2)?;

    text_of(total).replace(',', "").parse().ok()
}

/// Extracts the flat field map of a contract detail page
pub fn parse_detail_page(html: &str) -> ExtractResult<DetailMap> {
    let document = Html::parse_document(html);
    parse_detail_document(&document)
}

pub(crate) fn parse_detail_document(document: &Html) -> ExtractResult<DetailMap> {
    let row_selector = css("tr")?;
    let span_selector = css("span")?;
    let input_selector = css("input[type=\"text\"], input[type=\"hidden\"]")?;
    let select_selector = css("select")?;
    let option_selector = css("option[selected]")?;
    let label_selector = css("span[id^=\"lbl\"]")?;
    let textarea_selector = css("textarea[id]")?;
    let display_selector = css("td.displayText[id]")?;

    let mut details = DetailMap::new();

    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef<'_>> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|element| element.value().name() == "td")
            .collect();
        if cells.len() < 2 {
            continue;
        }

        let Some(label_span) = cells[0].select(&span_selector).next() else {
            continue;
        };
        let label = text_of(label_span).trim_end_matches(':').trim().to_string();
        if label.is_empty() {
            continue;
        }

        let inputs: Vec<ElementRef<'_>> = row.select(&input_selector).collect();
        for input in &inputs {
            let Some(value) = non_empty_attr(*input, "value") else {
                continue;
            };
            let attrs = input.value();
            let suffix = attrs
                .attr("title")
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .or_else(|| attrs.attr("name").filter(|name| !name.is_empty()))
                .or_else(|| attrs.attr("id").filter(|id| !id.is_empty()));

            let key = match suffix {
                Some(suffix) => clean_field_name(&format!("{}_{}", label, suffix)),
                None => clean_field_name(&label),
            };
            details.insert(key, value);
        }

        let selects: Vec<ElementRef<'_>> = row.select(&select_selector).collect();
        if inputs.is_empty() {
            for select in &selects {
                if let Some(option) = select.select(&option_selector).next() {
                    let value = text_of(option);
                    if !value.is_empty() {
                        details.insert(clean_field_name(&label), value);
                    }
                }
            }
        }

        if inputs.is_empty() && selects.is_empty() {
            let display = cells[1..]
                .iter()
                .filter(|cell| cell.value().classes().any(|class| class == "displayText"))
                .map(|cell| text_of(*cell))
                .find(|text| !text.is_empty());
            if let Some(text) = display {
                details.insert(clean_field_name(&format!("{}_display", label)), text);
            }
        }
    }

    let labels: HashMap<&str, String> = document
        .select(&label_selector)
        .filter_map(|span| {
            let id = span.value().id()?;
            Some((id, text_of(span).trim_end_matches(':').trim().to_string()))
        })
        .collect();

    let label_for = |id: &str| -> Option<&String> {
        labels
            .get(format!("lbl{}", id).as_str())
            .or_else(|| labels.get(format!("lbl{}", capitalize(id)).as_str()))
            .filter(|label| !label.is_empty())
    };

    for textarea in document.select(&textarea_selector) {
        let Some(id) = textarea.value().id() else {
            continue;
        };
        let Some(label) = label_for(id) else {
            continue;
        };
        let value = non_empty_attr(textarea, "value").or_else(|| {
            let text = text_of(textarea);
            (!text.is_empty()).then_some(text)
        });
        if let Some(value) = value {
            details.insert(clean_field_name(label), value);
        }
    }

    for cell in document.select(&display_selector) {
        let Some(id) = cell.value().id() else {
            continue;
        };
        let Some(label) = label_for(id) else {
            continue;
        };
        let text = text_of(cell);
        if !text.is_empty() {
            details.insert(clean_field_name(label), text);
        }
    }

    Ok(details)
}

fn non_empty_attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = r#"
<html><body>
<table><tr>
  <td><span class="results_heading">List Of Contract Actions Matching Your Criteria</span></td>
  <td>Results <b>1</b> - <b>30</b> of <b>16,366</b></td>
</tr></table>
<table class="resultbox1">
  <tr><td>Award ID:</td><td>W91-0001</td><td>Vendor Name:</td><td>ACME CORP</td></tr>
  <tr><td>Action Obligation:</td><td>$1,200.00</td></tr>
  <tr><td><a title="View" href="javascript:openWin('/ezsearch/jsp/viewLinkController.jsp?agencyID=9700&amp;PIID=W91-0001&amp;docType=AWARD','_blank')">View</a></td></tr>
</table>
<table class="resultbox2">
  <tr><td>Award ID:</td><td>N00-0002</td></tr>
</table>
</body></html>
"#;

    #[test]
    fn test_clean_field_name() {
        assert_eq!(clean_field_name("Vendor Name"), "vendor_name");
        assert_eq!(clean_field_name("  Ultimate   Completion Date mmddyyyy "), "ultimate_completion_date");
        assert_eq!(clean_field_name("Obligated ($)"), "obligated");
        assert_eq!(clean_field_name(""), "field");
    }

    #[test]
    fn test_parse_search_page() {
        let records = parse_search_page(SEARCH_PAGE, 4).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.page, 4);
        assert_eq!(first.position, 0);
        assert_eq!(first.fields["award_id"], "W91-0001");
        assert_eq!(first.fields["vendor_name"], "ACME CORP");
        assert_eq!(first.fields["action_obligation"], "$1,200.00");

        let reference = first.detail_ref.as_ref().unwrap();
        assert_eq!(reference["agencyID"], "9700");
        assert_eq!(reference["PIID"], "W91-0001");
        assert_eq!(reference["docType"], "AWARD");

        assert_eq!(records[1].position, 1);
        assert!(records[1].detail_ref.is_none());
    }

    #[test]
    fn test_parse_empty_search_page() {
        let records = parse_search_page("<html><body>No results</body></html>", 0).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_view_link() {
        let params =
            parse_view_link("viewLinkController.jsp?modNumber=P0001&idvPIID=AB%20C").unwrap();
        assert_eq!(params["modNumber"], "P0001");
        assert_eq!(params["idvPIID"], "AB C");

        assert!(parse_view_link("javascript:void(0)").is_none());
    }

    #[test]
    fn test_parse_total_count() {
        assert_eq!(parse_total_count(SEARCH_PAGE), Some(16_366));
        assert_eq!(parse_total_count("<html><body></body></html>"), None);
    }

    #[test]
    fn test_parse_detail_page() {
        let html = r#"
<html><body>
<table>
  <tr>
    <td><span>Date Signed (mm/dd/yyyy):</span></td>
    <td><input type="text" title="Date" value="02/14/2026"></td>
  </tr>
  <tr>
    <td><span>Contracting Office:</span></td>
    <td><input type="hidden" name="officeCode" value="N00024"></td>
  </tr>
  <tr>
    <td><span>Type of Contract:</span></td>
    <td><select><option>A</option><option selected>FIRM FIXED PRICE</option></select></td>
  </tr>
  <tr>
    <td><span>Status:</span></td>
    <td class="displayText">Final</td>
  </tr>
  <tr>
    <td><span id="lblDescriptionOfContractRequirement">Description Of Requirement:</span></td>
    <td><textarea id="descriptionOfContractRequirement">SHIP REPAIR</textarea></td>
  </tr>
  <tr>
    <td><span id="lblDisplayPreparedBy">Prepared By</span></td>
    <td id="displayPreparedBy" class="displayText">JDOE</td>
  </tr>
</table>
</body></html>
"#;
        let details = parse_detail_page(html).unwrap();
        assert_eq!(details["date_signed_date"], "02/14/2026");
        assert_eq!(details["contracting_office_officecode"], "N00024");
        assert_eq!(details["type_of_contract"], "FIRM FIXED PRICE");
        assert_eq!(details["status_display"], "Final");
        assert_eq!(details["description_of_requirement"], "SHIP REPAIR");
        assert_eq!(details["prepared_by"], "JDOE");
    }
}
