//! Integration tests for match settlement against an on-disk ledger

mod common;

use common::{ids, red_wins_8_3, Harness, RecordingChannel};

use carematch_ledger::db::models::audit_actions;
use carematch_ledger::db::{
    current_timestamp, matches, CreditStatus, MatchParticipant, MatchRound, MatchStatus, NewMatch, Team,
    TransactionKind, TransactionQuery,
};
use carematch_ledger::services::{CreditState, GrantRequest, RedeemRequest, RoundInput, SettleRequest};
use carematch_ledger::LedgerError;
use diesel::connection::SimpleConnection;

async fn balance(h: &Harness, account: &str) -> (i64, i64) {
    let b = h.services.wallets.balance(account).await.unwrap();
    (b.honor, b.local)
}

/// Test the dual credit on a decisive result
#[tokio::test]
async fn test_win_credits_both_currencies() {
    let h = Harness::new().await;

    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();

    assert_eq!(outcome.winner, Some(Team::Red));
    assert_eq!((outcome.red_total, outcome.yellow_total), (8, 3));
    assert_eq!(outcome.credit_status, CreditStatus::Credited);
    assert!(outcome.failures.is_empty());
    assert!(outcome.results.iter().all(|r| r.credit == CreditState::Credited));

    assert_eq!(balance(&h, "red-1").await, (100, 100));
    assert_eq!(balance(&h, "red-2").await, (100, 100));
    assert_eq!(balance(&h, "yellow-1").await, (10, 10));
    assert_eq!(balance(&h, "yellow-2").await, (10, 10));

    let history = h
        .services
        .wallets
        .history("red-1", TransactionQuery::recent(10))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind().unwrap(), TransactionKind::Earned);
    assert_eq!(history[0].match_id.as_deref(), Some(outcome.match_id.as_str()));
    assert_eq!(history[0].store_id.as_deref(), Some("store-a"));

    let detail = h.services.settlement.get_match(&outcome.match_id).await.unwrap();
    assert_eq!(detail.record.status().unwrap(), MatchStatus::Completed);
    assert_eq!(detail.record.credit_status, "credited");
    assert_eq!(detail.rounds.len(), 2);
    assert_eq!(detail.participants.len(), 4);
    assert_eq!(detail.audit[0].action, audit_actions::SETTLED);
    assert_eq!(detail.transactions.len(), 4);
}

/// Test that a draw awards the draw amount to everyone
#[tokio::test]
async fn test_draw_credits_fifty_each() {
    let h = Harness::new().await;

    let mut request = red_wins_8_3();
    request.rounds = vec![RoundInput::new(5, 5, "evidence/draw.jpg")];
    let outcome = h.services.settlement.settle(request).await.unwrap();

    assert_eq!(outcome.winner, None);
    for id in ["red-1", "red-2", "yellow-1", "yellow-2"] {
        assert_eq!(balance(&h, id).await, (50, 50));
    }
}

/// Test that invalid submissions persist nothing
#[tokio::test]
async fn test_rejected_submissions_leave_no_trace() {
    let h = Harness::new().await;

    // Same account on both teams
    let mut both_teams = red_wins_8_3();
    both_teams.yellow_team = ids(&["yellow-1", "red-1"]);
    assert!(matches!(
        h.services.settlement.settle(both_teams).await,
        Err(LedgerError::Validation(_))
    ));

    // A round without evidence
    let mut no_evidence = red_wins_8_3();
    no_evidence.rounds.push(RoundInput {
        red_score: 1,
        yellow_score: 0,
        evidence_ref: None,
    });
    assert!(matches!(
        h.services.settlement.settle(no_evidence).await,
        Err(LedgerError::Validation(_))
    ));

    // Seven players
    let mut oversized = red_wins_8_3();
    oversized.red_team = ids(&["a", "b", "c", "d", "e", "f", "g"]);
    assert!(matches!(
        h.services.settlement.settle(oversized).await,
        Err(LedgerError::Validation(_))
    ));

    // Unknown account
    let mut unknown = red_wins_8_3();
    unknown.red_team = ids(&["red-1", "ghost"]);
    assert!(matches!(
        h.services.settlement.settle(unknown).await,
        Err(LedgerError::NotFound(_))
    ));

    // Staff cannot play
    let mut staff = red_wins_8_3();
    staff.red_team = ids(&["op-a"]);
    assert!(matches!(
        h.services.settlement.settle(staff).await,
        Err(LedgerError::Validation(_))
    ));

    let stats = h.db.stats().unwrap();
    assert_eq!(stats.match_count, 0);
    assert_eq!(stats.transaction_count, 0);
}

/// Test that a client-chosen match id cannot be settled twice
#[tokio::test]
async fn test_resubmitted_match_conflicts() {
    let h = Harness::new().await;

    let mut request = red_wins_8_3();
    request.match_id = Some("tablet-42-match-7".into());
    h.services.settlement.settle(request.clone()).await.unwrap();

    assert!(matches!(
        h.services.settlement.settle(request).await,
        Err(LedgerError::Conflict(_))
    ));
    assert_eq!(balance(&h, "red-1").await, (100, 100));
}

/// Test re-credit after the credit phase never ran
#[tokio::test]
async fn test_recredit_is_idempotent() {
    let h = Harness::new().await;

    // A match persisted by a process that stopped before crediting
    h.db.with_transaction(|conn| {
        let now = current_timestamp();
        let participants = [("red-1", "red", "win", 100), ("yellow-1", "yellow", "loss", 10)]
            .iter()
            .map(|(account, team, result, award)| MatchParticipant {
                match_id: "m-stalled".into(),
                account_id: account.to_string(),
                team: team.to_string(),
                result: result.to_string(),
                award: *award,
            })
            .collect::<Vec<_>>();
        let rounds = vec![MatchRound {
            match_id: "m-stalled".into(),
            round_index: 0,
            red_score: 4,
            yellow_score: 1,
            evidence_ref: "evidence/stalled.jpg".into(),
        }];
        matches::insert_completed_match(
            conn,
            &NewMatch {
                id: "m-stalled",
                store_id: "store-a",
                status: "completed",
                winner: Some("red"),
                red_total: 4,
                yellow_total: 1,
                credit_status: "pending",
                recorded_by: None,
                created_at: &now,
                completed_at: Some(&now),
                updated_at: &now,
            },
            &participants,
            &rounds,
        )
        .map(|_| ())
    })
    .unwrap();

    let first = h.services.settlement.recredit("m-stalled", Some("op-a")).await.unwrap();
    assert_eq!(first.credited.len(), 2);
    assert_eq!(first.credit_status, CreditStatus::Credited);

    let second = h.services.settlement.recredit("m-stalled", Some("op-a")).await.unwrap();
    assert!(second.credited.is_empty());
    assert_eq!(second.already_credited.len(), 2);

    assert_eq!(balance(&h, "red-1").await, (100, 100));
    assert_eq!(balance(&h, "yellow-1").await, (10, 10));

    let earned = h
        .services
        .wallets
        .history("red-1", TransactionQuery {
            kind: Some(TransactionKind::Earned),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(earned.len(), 1);

    let detail = h.services.settlement.get_match("m-stalled").await.unwrap();
    let recredits = detail
        .audit
        .iter()
        .filter(|a| a.action == audit_actions::RECREDITED)
        .count();
    assert_eq!(recredits, 2);
}

/// Test re-credit after a normal settlement adds nothing
#[tokio::test]
async fn test_recredit_after_settle_skips_everyone() {
    let h = Harness::new().await;
    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();

    let summary = h.services.settlement.recredit(&outcome.match_id, None).await.unwrap();
    assert!(summary.credited.is_empty());
    assert_eq!(summary.already_credited.len(), 4);
    assert_eq!(balance(&h, "yellow-2").await, (10, 10));
}

/// Test that a wallet failure after the match commits does not fail settlement
#[tokio::test]
async fn test_credit_failure_does_not_fail_settlement() {
    let h = Harness::new().await;
    h.db.with_conn(|conn| {
        conn.batch_execute(
            "CREATE TRIGGER block_red_2 BEFORE INSERT ON point_transactions
             WHEN NEW.account_id = 'red-2'
             BEGIN SELECT RAISE(ABORT, 'ledger write refused'); END;",
        )?;
        Ok(())
    })
    .unwrap();

    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();

    assert_eq!(outcome.credit_status, CreditStatus::Partial);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].account_id, "red-2");
    let red_2 = outcome.results.iter().find(|r| r.account_id == "red-2").unwrap();
    assert_eq!(red_2.credit, CreditState::Failed);

    assert_eq!(balance(&h, "red-1").await, (100, 100));
    assert_eq!(balance(&h, "red-2").await, (0, 0));
    assert_eq!(balance(&h, "yellow-1").await, (10, 10));

    let detail = h.services.settlement.get_match(&outcome.match_id).await.unwrap();
    assert_eq!(detail.record.status().unwrap(), MatchStatus::Completed);
    assert_eq!(detail.rounds.len(), 2);
    assert_eq!(detail.record.credit_status, CreditStatus::Partial.as_str());

    h.db.with_conn(|conn| {
        conn.batch_execute("DROP TRIGGER block_red_2")?;
        Ok(())
    })
    .unwrap();

    let summary = h.services.settlement.recredit(&outcome.match_id, None).await.unwrap();
    assert_eq!(summary.credited, ids(&["red-2"]));
    assert_eq!(summary.credit_status, CreditStatus::Credited);
    assert_eq!(balance(&h, "red-2").await, (100, 100));

    let detail = h.services.settlement.get_match(&outcome.match_id).await.unwrap();
    assert_eq!(detail.record.credit_status, CreditStatus::Credited.as_str());
}

/// Test that a dead push gateway does not fail settlement
#[tokio::test]
async fn test_failing_channel_does_not_block_settlement() {
    let h = Harness::with_channel(RecordingChannel::failing()).await;
    h.services.accounts.link("carer-1", "red-1").await.unwrap();

    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();
    assert_eq!(outcome.credit_status, CreditStatus::Credited);
    assert_eq!(balance(&h, "red-1").await, (100, 100));

    let channel = h.shutdown().await;
    assert!(channel.sent.lock().unwrap().is_empty());
    // Every attempt of the retry policy was used
    assert_eq!(*channel.attempts.lock().unwrap(), 2);
}

/// Test that linked caregivers hear about the result
#[tokio::test]
async fn test_caregiver_notified_of_result() {
    let h = Harness::new().await;
    h.services.accounts.link("carer-1", "yellow-1").await.unwrap();

    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();

    let channel = h.shutdown().await;
    let sent = channel.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient_id, "carer-1");
    assert_eq!(sent[0].title, "Match played");
    assert_eq!(
        sent[0].message,
        format!("Edna played match {} and earned 10 points.", outcome.match_id)
    );
    assert_eq!(sent[0].metadata["match_id"], outcome.match_id.as_str());
    assert_eq!(sent[0].metadata["result"], "loss");
}

/// Test that editing rounds flips the result and corrects awards
#[tokio::test]
async fn test_edit_rounds_corrects_awards() {
    let h = Harness::new().await;
    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();

    let edit = h
        .services
        .settlement
        .edit_rounds(
            &outcome.match_id,
            vec![RoundInput::new(1, 5, "evidence/end-1.jpg"), RoundInput::new(2, 3, "evidence/end-2.jpg")],
            Some("op-a"),
        )
        .await
        .unwrap();

    assert_eq!(edit.previous.winner, Some(Team::Red));
    assert_eq!(edit.current.winner, Some(Team::Yellow));
    assert_eq!(edit.corrections.len(), 4);
    assert!(edit.failures.is_empty());

    assert_eq!(balance(&h, "red-1").await, (10, 10));
    assert_eq!(balance(&h, "yellow-1").await, (100, 100));

    let detail = h.services.settlement.get_match(&outcome.match_id).await.unwrap();
    assert_eq!((detail.record.red_total, detail.record.yellow_total), (3, 8));
    assert_eq!(detail.rounds[0].yellow_score, 5);
    assert!(detail.audit.iter().any(|a| a.action == audit_actions::EDITED));

    // Re-editing to the same rounds changes nothing
    let again = h
        .services
        .settlement
        .edit_rounds(
            &outcome.match_id,
            vec![RoundInput::new(1, 5, "evidence/end-1.jpg"), RoundInput::new(2, 3, "evidence/end-2.jpg")],
            None,
        )
        .await
        .unwrap();
    assert!(again.corrections.is_empty());

    for id in ["red-1", "red-2", "yellow-1", "yellow-2"] {
        assert!(h.services.wallets.reconcile(id).await.unwrap().consistent);
    }
}

/// Test that a correction which would overdraw is reported, not applied
#[tokio::test]
async fn test_edit_correction_cannot_overdraw() {
    let h = Harness::new().await;
    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();

    h.services
        .grants
        .redeem(RedeemRequest {
            account_id: "red-1".into(),
            amount: 95,
            description: "Garden voucher".into(),
            store_id: "store-a".into(),
            operator_id: "op-a".into(),
        })
        .await
        .unwrap();

    let edit = h
        .services
        .settlement
        .edit_rounds(&outcome.match_id, vec![RoundInput::new(0, 1, "evidence/redo.jpg")], None)
        .await
        .unwrap();

    assert_eq!(edit.failures.len(), 1);
    assert_eq!(edit.failures[0].account_id, "red-1");
    assert_eq!(edit.credit_status, CreditStatus::Partial);
    assert_eq!(balance(&h, "red-1").await, (100, 5));
    assert_eq!(balance(&h, "red-2").await, (10, 10));

    let detail = h.services.settlement.get_match(&outcome.match_id).await.unwrap();
    assert_eq!(detail.record.credit_status, CreditStatus::Partial.as_str());
}

/// Test that a failed correction is finished by a later re-credit
#[tokio::test]
async fn test_recredit_finishes_failed_correction() {
    let h = Harness::new().await;
    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();

    let redeem = RedeemRequest {
        account_id: "red-1".into(),
        amount: 95,
        description: "Garden voucher".into(),
        store_id: "store-a".into(),
        operator_id: "op-a".into(),
    };
    h.services.grants.redeem(redeem).await.unwrap();

    let edit = h
        .services
        .settlement
        .edit_rounds(&outcome.match_id, vec![RoundInput::new(0, 1, "evidence/redo.jpg")], None)
        .await
        .unwrap();
    assert_eq!(edit.failures.len(), 1);

    // A repeat edit with the same rounds still owes red-1 its correction
    let again = h
        .services
        .settlement
        .edit_rounds(&outcome.match_id, vec![RoundInput::new(0, 1, "evidence/redo.jpg")], None)
        .await
        .unwrap();
    assert_eq!(again.failures.len(), 1);
    assert_eq!(again.credit_status, CreditStatus::Partial);

    h.services
        .grants
        .grant(GrantRequest {
            account_id: "red-1".into(),
            local_amount: 500,
            reason: "Volunteer week".into(),
            store_id: "store-a".into(),
            operator_id: "op-a".into(),
        })
        .await
        .unwrap();

    let summary = h.services.settlement.recredit(&outcome.match_id, None).await.unwrap();
    assert_eq!(summary.corrected, ids(&["red-1"]));
    assert!(summary.credited.is_empty());
    assert_eq!(summary.already_credited.len(), 3);
    assert_eq!(summary.credit_status, CreditStatus::Credited);

    let detail = h.services.settlement.get_match(&outcome.match_id).await.unwrap();
    let red_1 = detail
        .participants
        .iter()
        .find(|p| p.account_id == "red-1")
        .unwrap();
    assert_eq!(red_1.award, 10);
    assert_eq!(balance(&h, "red-1").await, (red_1.award, 5 + 500 - 90));
    assert_eq!(detail.record.credit_status, CreditStatus::Credited.as_str());

    // Nothing left to correct
    let settled = h.services.settlement.recredit(&outcome.match_id, None).await.unwrap();
    assert!(settled.corrected.is_empty());
    assert_eq!(settled.already_credited.len(), 4);
    assert!(h.services.wallets.reconcile("red-1").await.unwrap().consistent);
}

/// Test soft delete keeps credited points and blocks re-credit
#[tokio::test]
async fn test_delete_match_is_soft() {
    let h = Harness::new().await;
    let outcome = h.services.settlement.settle(red_wins_8_3()).await.unwrap();

    assert!(h.services.settlement.delete_match(&outcome.match_id, Some("op-a")).await.unwrap());
    assert!(!h.services.settlement.delete_match(&outcome.match_id, Some("op-a")).await.unwrap());

    let detail = h.services.settlement.get_match(&outcome.match_id).await.unwrap();
    assert_eq!(detail.record.status().unwrap(), MatchStatus::Deleted);
    assert!(detail.record.deleted_at.is_some());
    assert_eq!(balance(&h, "red-1").await, (100, 100));

    assert!(matches!(
        h.services.settlement.recredit(&outcome.match_id, None).await,
        Err(LedgerError::Validation(_))
    ));
    assert!(matches!(
        h.services
            .settlement
            .edit_rounds(&outcome.match_id, vec![RoundInput::new(1, 0, "e")], None)
            .await,
        Err(LedgerError::Validation(_))
    ));
    assert!(matches!(
        h.services.settlement.delete_match("no-such-match", None).await,
        Err(LedgerError::NotFound(_))
    ));
}

/// Test that matches between different players settle in parallel
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_settlements_reconcile() {
    let h = Harness::new().await;

    let settlements = (0..8).map(|i| {
        let settlement = h.services.settlement.clone();
        let request = SettleRequest {
            match_id: Some(format!("m-{}", i)),
            store_id: "store-a".into(),
            rounds: vec![RoundInput::new(i % 3, 1, "evidence/round.jpg")],
            red_team: ids(&["red-1", "red-2"]),
            yellow_team: ids(&["yellow-1", "yellow-2"]),
            recorded_by: None,
        };
        tokio::spawn(async move { settlement.settle(request).await })
    });

    for joined in futures::future::join_all(settlements).await {
        joined.unwrap().unwrap();
    }

    let reports = h.services.wallets.reconcile_all().await.unwrap();
    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(|r| r.consistent && r.entries == 8));
}
