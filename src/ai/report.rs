use super::evaluator::Verdict;
use crate::helpers::escape_html;

/// Fraction of sufficient answers, 0.0 for an empty set.
pub fn success_rate(sufficient: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        sufficient as f64 / total as f64
    }
}

/// Renders the final per-attempt report as an HTML-mode message. Insufficient
/// answers contribute numbered recommendations, in question order.
pub fn build_report(verdicts: &[Verdict]) -> String {
    let total = verdicts.len();
    let sufficient = verdicts.iter().filter(|v| v.is_sufficient).count();
    let rate = success_rate(sufficient, total);

    let mut report = format!(
        "📊 <b>Test analysis results:</b>\n\n\
         ✅ Sufficient answers: {sufficient}/{total}\n\
         📈 Success rate: {:.1}%\n\n",
        rate * 100.0
    );

    if sufficient == total {
        report.push_str("🎉 Excellent work! Every answer was sufficient.\n");
    } else {
        report.push_str("💡 <b>Recommendations:</b>\n");
        let mut number = 0;
        for (index, verdict) in verdicts.iter().enumerate() {
            if verdict.is_sufficient {
                continue;
            }
            number += 1;
            report.push_str(&format!(
                "{number}. Question {}: {}\n",
                index + 1,
                escape_html(&verdict.recommendation)
            ));
        }
    }

    report.push_str("\n📚 Keep studying the material and move on to the next block!");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(is_sufficient: bool, recommendation: &str) -> Verdict {
        Verdict {
            is_sufficient,
            recommendation: recommendation.to_string(),
        }
    }

    #[test]
    fn rate_is_a_plain_fraction() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(2, 3), 2.0 / 3.0);
        assert_eq!(success_rate(3, 3), 1.0);
    }

    #[test]
    fn mixed_results_list_only_insufficient_answers() {
        let report = build_report(&[
            verdict(true, "fine"),
            verdict(false, "Reread the size classes."),
            verdict(false, "Mention the double hull."),
        ]);

        assert!(report.contains("Sufficient answers: 1/3"));
        assert!(report.contains("Success rate: 33.3%"));
        assert!(report.contains("1. Question 2: Reread the size classes."));
        assert!(report.contains("2. Question 3: Mention the double hull."));
        assert!(!report.contains("fine"));
    }

    #[test]
    fn all_sufficient_congratulates_without_recommendations() {
        let report = build_report(&[verdict(true, "a"), verdict(true, "b")]);
        assert!(report.contains("Success rate: 100.0%"));
        assert!(report.contains("Excellent work"));
        assert!(!report.contains("Recommendations"));
    }

    #[test]
    fn recommendations_are_html_escaped() {
        let report = build_report(&[verdict(false, "use <b>bold</b> terms")]);
        assert!(report.contains("use &lt;b&gt;bold&lt;/b&gt; terms"));
    }
}
